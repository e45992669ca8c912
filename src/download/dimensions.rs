//! Out-of-band image dimension lookup for the width/height filter.
//!
//! [`HttpDimensionFetcher`] asks for the first few kilobytes of the image
//! and lets the `image` decoders read the size from its header (PNG, GIF,
//! JPEG, WebP). Any failure yields `None`; what `None` means (pass or
//! reject) is the task's policy.

use std::io::Cursor;

use async_trait::async_trait;
use futures_util::StreamExt;
use image::ImageReader;
use reqwest::Client;
use reqwest::header::RANGE;
use tracing::{debug, instrument};

use super::client::{ClientOptions, build_client};
use super::constants::{DIMENSION_PROBE_BYTES, DIMENSION_PROBE_TIMEOUT};
use crate::model::Dimensions;

/// Looks up the pixel dimensions of a remote image.
#[async_trait]
pub trait DimensionFetcher: Send + Sync {
    /// Returns the dimensions of the image at `url`, `None` when unavailable.
    async fn fetch_dimensions(&self, url: &str) -> Option<Dimensions>;
}

/// Fetcher that never knows the dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownDimensions;

#[async_trait]
impl DimensionFetcher for UnknownDimensions {
    async fn fetch_dimensions(&self, _url: &str) -> Option<Dimensions> {
        None
    }
}

/// [`DimensionFetcher`] using a ranged GET and header sniffing.
#[derive(Debug, Clone)]
pub struct HttpDimensionFetcher {
    client: Client,
}

impl HttpDimensionFetcher {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from `options` with the probe timeout applied.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error.
    pub fn from_options(options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let options = options.clone().with_timeout(DIMENSION_PROBE_TIMEOUT);
        Ok(Self::new(build_client(&options)?))
    }
}

#[async_trait]
impl DimensionFetcher for HttpDimensionFetcher {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn fetch_dimensions(&self, url: &str) -> Option<Dimensions> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", DIMENSION_PROBE_BYTES - 1))
            .send()
            .await
            .inspect_err(|e| debug!(error = %e, "dimension probe request failed"))
            .ok()?;

        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "dimension probe rejected");
            return None;
        }

        let limit = usize::try_from(DIMENSION_PROBE_BYTES).unwrap_or(usize::MAX);
        let mut head = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            head.extend_from_slice(&chunk.ok()?);
            if let Some(found) = sniff_dimensions(&head) {
                return Some(found);
            }
            if head.len() >= limit {
                break;
            }
        }
        debug!(bytes = head.len(), "no recognizable image header");
        None
    }
}

/// Reads image dimensions from the start of an encoded image.
///
/// The format is guessed from the leading bytes. `None` when the format is
/// unknown or the header is not complete yet.
#[must_use]
pub fn sniff_dimensions(head: &[u8]) -> Option<Dimensions> {
    ImageReader::new(Cursor::new(head))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
        .map(|(width, height)| Dimensions::new(width, height))
}
