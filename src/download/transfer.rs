//! Streaming file transfers.
//!
//! A [`FileFetcher`] opens one transfer and hands back the status, the
//! advertised total, and a chunk stream. The download task consumes the
//! stream itself so it can report progress, apply the size filter on the
//! first chunk, and abort mid-flight.

use std::fmt;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Client;
use tracing::{debug, instrument};

use super::client::{ClientOptions, build_client};
use super::error::TransportError;

/// Status code of a successful full transfer.
pub const STATUS_OK: u16 = 200;

/// An opened transfer.
pub struct TransferResponse {
    /// HTTP status of the response.
    pub status: u16,
    /// Advertised body length, when known.
    pub total: Option<u64>,
    /// Body chunks in order.
    pub body: BoxStream<'static, Result<Vec<u8>, TransportError>>,
}

impl TransferResponse {
    /// A response carrying `status` and no body.
    #[must_use]
    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            total: None,
            body: stream::empty().boxed(),
        }
    }

    /// A response delivering `chunks` with the given advertised total.
    #[must_use]
    pub fn from_chunks(status: u16, total: Option<u64>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            total,
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    /// Whether the transfer can be consumed as the file body.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl fmt::Debug for TransferResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferResponse")
            .field("status", &self.status)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Opens streaming transfers.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Opens a transfer of `url`.
    ///
    /// A non-success HTTP status is returned as `Ok` with that status; only
    /// failures without a response are `Err`.
    async fn open(&self, url: &str) -> Result<TransferResponse, TransportError>;
}

/// [`FileFetcher`] over reqwest with no read timeout.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    client: Client,
}

impl HttpFileFetcher {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from `options` with the request timeout cleared.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error.
    pub fn from_options(options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let options = ClientOptions {
            request_timeout: None,
            ..options.clone()
        };
        Ok(Self::new(build_client(&options)?))
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn open(&self, url: &str) -> Result<TransferResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::network(url, e))?;

        let status = response.status().as_u16();
        let total = response.content_length();
        debug!(status, ?total, "transfer opened");

        if status != STATUS_OK {
            return Ok(TransferResponse::status_only(status));
        }

        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::interrupted(owned_url.clone(), e.to_string()))
            })
            .boxed();

        Ok(TransferResponse {
            status,
            total,
            body,
        })
    }
}
