//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use super::retry::STATUS_NO_RESPONSE;

/// Errors raised while opening or streaming a transfer.
///
/// Every variant maps to a status code via [`TransportError::status`]; a
/// failure without any HTTP response maps to status 0.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The body stream broke after the response started.
    #[error("stream interrupted fetching {url}: {message}")]
    Interrupted {
        /// The URL being streamed.
        url: String,
        /// Description of the interruption.
        message: String,
    },

    /// The file has no URL for any size variant.
    #[error("no source URL for {id}")]
    MissingSource {
        /// File identifier.
        id: String,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a stream interruption error.
    pub fn interrupted(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interrupted {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Status code this error reports to the retry classifier.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Network { source, .. } => source
                .status()
                .map_or(STATUS_NO_RESPONSE, |status| status.as_u16()),
            Self::Interrupted { .. } | Self::MissingSource { .. } => STATUS_NO_RESPONSE,
        }
    }
}

/// Errors raised while converting or compiling a file after transfer.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The requested target format cannot be produced.
    #[error("conversion to {format} is not supported")]
    Unsupported {
        /// Target format label.
        format: String,
    },

    /// The novel carried no text content.
    #[error("novel {id} has no content")]
    MissingContent {
        /// File identifier.
        id: String,
    },

    /// The converter ran and failed.
    #[error("conversion failed: {message}")]
    Failed {
        /// Converter message.
        message: String,
    },
}

/// Errors raised by the directory sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File system error while writing.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
