//! Work applied to a file between transfer and handoff.
//!
//! Animated works arrive as a frame archive and may be converted to a single
//! container; novels have no binary source and are rendered to text.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Instant;

use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};
use tracing::debug;
use zip::ZipArchive;

use super::error::TranscodeError;
use crate::config::UgoiraFormat;
use crate::model::{NovelMeta, UgoiraMeta};

/// NeuQuant sampling factor for GIF palettes: 1 is best, 30 fastest.
const GIF_ENCODE_SPEED: i32 = 10;

/// Converts a frame archive into a target container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Converts `archive` using the frame timings in `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError`] when the conversion fails; the download task
    /// counts that as a retry.
    async fn convert(
        &self,
        archive: Vec<u8>,
        meta: &UgoiraMeta,
        format: UgoiraFormat,
    ) -> Result<Vec<u8>, TranscodeError>;
}

/// [`Transcoder`] that decodes the frame archive and encodes GIF or APNG.
///
/// Frames are read from the zip archive by the names listed in the
/// metadata, in playback order, and must share one size. WebM has no encoder
/// here and reports [`TranscodeError::Unsupported`]. Work runs on the
/// blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTranscoder;

/// One decoded frame and its display time in milliseconds.
struct DecodedFrame {
    image: RgbaImage,
    delay: u32,
}

impl FrameTranscoder {
    fn convert_archive(
        archive: &[u8],
        meta: &UgoiraMeta,
        format: UgoiraFormat,
    ) -> Result<Vec<u8>, TranscodeError> {
        match format {
            UgoiraFormat::Gif => encode_gif(decode_frames(archive, meta)?),
            UgoiraFormat::Png => encode_apng(decode_frames(archive, meta)?),
            UgoiraFormat::Webm | UgoiraFormat::None => Err(TranscodeError::Unsupported {
                format: format.extension().unwrap_or("zip").to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transcoder for FrameTranscoder {
    async fn convert(
        &self,
        archive: Vec<u8>,
        meta: &UgoiraMeta,
        format: UgoiraFormat,
    ) -> Result<Vec<u8>, TranscodeError> {
        let meta = meta.clone();
        let started = Instant::now();
        let converted =
            tokio::task::spawn_blocking(move || Self::convert_archive(&archive, &meta, format))
                .await
                .map_err(|e| failed("conversion task", e))??;
        debug!(
            format = ?format,
            bytes = converted.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "frames converted"
        );
        Ok(converted)
    }
}

fn failed(context: &str, error: impl fmt::Display) -> TranscodeError {
    TranscodeError::Failed {
        message: format!("{context}: {error}"),
    }
}

fn decode_frames(archive: &[u8], meta: &UgoiraMeta) -> Result<Vec<DecodedFrame>, TranscodeError> {
    if meta.frames.is_empty() {
        return Err(failed("frame list", "no frames"));
    }
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(|e| failed("archive", e))?;
    let mut frames: Vec<DecodedFrame> = Vec::with_capacity(meta.frames.len());
    for frame in &meta.frames {
        let mut data = Vec::new();
        zip.by_name(&frame.file)
            .map_err(|e| failed(&frame.file, e))?
            .read_to_end(&mut data)
            .map_err(|e| failed(&frame.file, e))?;
        let image = image::load_from_memory(&data)
            .map_err(|e| failed(&frame.file, e))?
            .into_rgba8();
        if frames
            .first()
            .is_some_and(|first| first.image.dimensions() != image.dimensions())
        {
            return Err(failed(&frame.file, "frame size differs from the first frame"));
        }
        frames.push(DecodedFrame {
            image,
            delay: frame.delay,
        });
    }
    Ok(frames)
}

fn encode_gif(frames: Vec<DecodedFrame>) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, GIF_ENCODE_SPEED);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| failed("gif", e))?;
        encoder
            .encode_frames(frames.into_iter().map(|frame| {
                Frame::from_parts(
                    frame.image,
                    0,
                    0,
                    Delay::from_numer_denom_ms(frame.delay, 1),
                )
            }))
            .map_err(|e| failed("gif", e))?;
    }
    Ok(out)
}

fn encode_apng(frames: Vec<DecodedFrame>) -> Result<Vec<u8>, TranscodeError> {
    let Some(first) = frames.first() else {
        return Err(failed("apng", "no frames"));
    };
    let (width, height) = first.image.dimensions();
    let count = u32::try_from(frames.len()).map_err(|e| failed("apng", e))?;

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .set_animated(count, 0)
            .map_err(|e| failed("apng", e))?;
        let mut writer = encoder.write_header().map_err(|e| failed("apng", e))?;
        for frame in &frames {
            // fcTL delays are u16 fractions: milliseconds over 1000.
            let delay = u16::try_from(frame.delay).unwrap_or(u16::MAX);
            writer
                .set_frame_delay(delay, 1000)
                .map_err(|e| failed("apng", e))?;
            writer
                .write_image_data(frame.image.as_raw())
                .map_err(|e| failed("apng", e))?;
        }
        writer.finish().map_err(|e| failed("apng", e))?;
    }
    Ok(out)
}

/// Renders a novel as UTF-8 text.
///
/// Layout: title, author, tags, caption, then the body, separated by blank
/// lines. Empty header fields are omitted.
#[must_use]
pub fn render_novel(meta: &NovelMeta) -> Vec<u8> {
    let mut sections = vec![meta.title.trim().to_string()];
    if !meta.author.trim().is_empty() {
        sections.push(meta.author.trim().to_string());
    }
    if !meta.tags.is_empty() {
        let tags: Vec<String> = meta.tags.iter().map(|t| format!("#{t}")).collect();
        sections.push(tags.join(" "));
    }
    if !meta.description.trim().is_empty() {
        sections.push(meta.description.trim().to_string());
    }
    sections.push(meta.content.clone());

    let mut text = sections.join("\n\n");
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.into_bytes()
}
