//! Sampled pixel colors and the decoder seam that produces them.

use async_trait::async_trait;
use tracing::debug;

/// Per-channel spread under which a pixel counts as gray.
const GRAY_TOLERANCE: u8 = 12;

/// Luma distance from either extreme under which a pixel counts as black or white.
const BLACK_WHITE_TOLERANCE: u8 = 24;

/// Samples per axis taken from a decoded image.
const SAMPLE_GRID: u32 = 8;

/// A handful of RGB pixels sampled from a decoded image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorSample {
    pixels: Vec<[u8; 3]>,
}

impl ColorSample {
    /// Creates a sample from RGB pixels.
    #[must_use]
    pub fn new(pixels: Vec<[u8; 3]>) -> Self {
        Self { pixels }
    }

    /// Whether the sample holds no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Whether every sampled pixel is gray.
    #[must_use]
    pub fn is_grayscale(&self) -> bool {
        self.pixels.iter().all(|&[r, g, b]| {
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            max - min <= GRAY_TOLERANCE
        })
    }

    /// Whether every sampled pixel is gray and near black or near white.
    #[must_use]
    pub fn is_black_white(&self) -> bool {
        self.is_grayscale()
            && self.pixels.iter().all(|&[r, g, b]| {
                let sum = u16::from(r) + u16::from(g) + u16::from(b);
                let luma = u8::try_from(sum / 3).unwrap_or(u8::MAX);
                luma <= BLACK_WHITE_TOLERANCE || luma >= u8::MAX - BLACK_WHITE_TOLERANCE
            })
    }
}

/// Decodes downloaded bytes into a color sample.
///
/// The download task only asks for a sample and admits the file when none
/// can be produced.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    /// Samples colors from encoded image bytes, `None` when undecodable.
    async fn sample_colors(&self, bytes: &[u8]) -> Option<ColorSample>;
}

/// [`ContentProbe`] backed by the `image` decoders.
///
/// Reads an evenly spaced grid of at most `SAMPLE_GRID` x `SAMPLE_GRID`
/// pixels from the first frame. Decoding runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageContentProbe;

impl ImageContentProbe {
    /// Decodes `bytes` and samples the grid, `None` when the bytes are not an image.
    #[must_use]
    pub fn sample(bytes: &[u8]) -> Option<ColorSample> {
        let rgb = image::load_from_memory(bytes)
            .inspect_err(|e| debug!(error = %e, "color sample decode failed"))
            .ok()?
            .into_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let xs = grid_positions(width);
        let pixels = grid_positions(height)
            .into_iter()
            .flat_map(|y| xs.iter().map(move |&x| (x, y)))
            .map(|(x, y)| rgb.get_pixel(x, y).0)
            .collect();
        Some(ColorSample::new(pixels))
    }
}

#[async_trait]
impl ContentProbe for ImageContentProbe {
    async fn sample_colors(&self, bytes: &[u8]) -> Option<ColorSample> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || Self::sample(&bytes))
            .await
            .ok()
            .flatten()
    }
}

/// Cell centers along one axis of the sampling grid.
fn grid_positions(extent: u32) -> Vec<u32> {
    let steps = SAMPLE_GRID.min(extent);
    (0..steps)
        .map(|i| {
            let center = (2 * u64::from(i) + 1) * u64::from(extent) / (2 * u64::from(steps));
            u32::try_from(center).unwrap_or(extent - 1)
        })
        .collect()
}
