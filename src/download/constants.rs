//! Constants for the download module (timeouts, probe sizes).

use std::time::Duration;

/// HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-request timeout for list and detail API calls.
pub const API_TIMEOUT_SECS: u64 = 60;

/// Bytes requested when probing image dimensions.
pub const DIMENSION_PROBE_BYTES: u64 = 64 * 1024;

/// Deadline for a dimension probe before the file is treated as unknown.
pub const DIMENSION_PROBE_TIMEOUT: Duration = Duration::from_secs(20);
