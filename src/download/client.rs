//! Shared reqwest client construction.
//!
//! File transfers and API calls share one builder so session cookies, the
//! referer, and the User-Agent stay consistent. File transfers carry no read
//! timeout: large originals on slow links must not be cut off.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::CONNECT_TIMEOUT_SECS;
use crate::user_agent;

/// Options applied to every client this crate builds.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Raw `Cookie` header value (`a=1; b=2`) for the logged-in session.
    pub cookie: Option<String>,
    /// Origin the cookies belong to.
    pub cookie_origin: Option<Url>,
    /// `Referer` sent with every request.
    pub referer: Option<String>,
    /// Whole-request timeout; `None` for streaming file transfers.
    pub request_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Returns a copy with the given whole-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Builds a reqwest client from `options`.
///
/// # Errors
///
/// Returns the reqwest builder error when TLS or proxy setup fails.
#[instrument(level = "debug", skip(options), fields(has_cookie = options.cookie.is_some()))]
pub fn build_client(options: &ClientOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .gzip(true)
        .user_agent(user_agent::default_user_agent());

    if let Some(timeout) = options.request_timeout {
        builder = builder.timeout(timeout);
    }

    if let (Some(cookie), Some(origin)) = (&options.cookie, &options.cookie_origin) {
        builder = builder.cookie_provider(cookie_jar(cookie, origin));
    }

    if let Some(referer) = &options.referer {
        match HeaderValue::from_str(referer) {
            Ok(value) => {
                let mut headers = HeaderMap::new();
                headers.insert(REFERER, value);
                builder = builder.default_headers(headers);
            }
            Err(_) => warn!(referer, "ignoring referer that is not a valid header value"),
        }
    }

    builder.build()
}

/// Splits a raw cookie header into a jar scoped to `origin`.
pub(crate) fn cookie_jar(cookie: &str, origin: &Url) -> Arc<Jar> {
    let jar = Jar::default();
    let mut added = 0usize;
    for pair in cookie.split(';').map(str::trim).filter(|p| p.contains('=')) {
        jar.add_cookie_str(pair, origin);
        added += 1;
    }
    debug!(added, origin = %origin, "loaded session cookies");
    Arc::new(jar)
}
