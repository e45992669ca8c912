//! Download settings consumed by the crawler and the download engine.
//!
//! Settings are read-only for the duration of a run. They are loaded from a
//! JSON file (every key optional) and then overridden by CLI flags.
//!
//! # Example
//!
//! ```
//! use artwork_downloader::config::{DownloadSettings, ImageSize};
//!
//! let settings: DownloadSettings =
//!     serde_json::from_str(r#"{ "max_retry": 4, "image_size": "regular" }"#).unwrap();
//! assert_eq!(settings.max_retry, 4);
//! assert_eq!(settings.image_size, ImageSize::Regular);
//! assert!(settings.validate().is_ok());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default number of attempts per file before the terminal decision.
pub const DEFAULT_MAX_RETRY: u32 = 10;

/// Default number of concurrent list-page fetch loops.
pub const DEFAULT_MAX_THREADS: usize = 5;

/// Default number of concurrent file downloads.
pub const DEFAULT_DOWNLOAD_THREADS: usize = 5;

/// Items per list page on the source platform.
pub const DEFAULT_PAGE_SIZE: u32 = 60;

/// Page cap for standard accounts.
pub const STANDARD_PAGE_CAP: u32 = 1000;

/// Page cap for premium accounts.
pub const PREMIUM_PAGE_CAP: u32 = 5000;

const MAX_RETRY_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
const THREAD_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`DownloadSettings`].
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// Human-readable constraint.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Size variant requested for image works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageSize {
    /// Full-resolution original.
    #[default]
    Original,
    /// Large re-encoded rendition.
    Regular,
    /// Small rendition.
    Small,
    /// Square thumbnail; animated works are never converted at this size.
    Thumb,
}

impl ImageSize {
    /// Stable key used in source variant maps.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Regular => "regular",
            Self::Small => "small",
            Self::Thumb => "thumb",
        }
    }
}

impl std::str::FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "regular" => Ok(Self::Regular),
            "small" => Ok(Self::Small),
            "thumb" => Ok(Self::Thumb),
            other => Err(format!("unknown image size '{other}'")),
        }
    }
}

/// Target container for animated (frame sequence) works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UgoiraFormat {
    /// WebM video.
    Webm,
    /// Animated GIF.
    Gif,
    /// Animated PNG.
    Png,
    /// Keep the downloaded frame archive as-is.
    #[default]
    None,
}

impl UgoiraFormat {
    /// File extension of the converted output, `None` when no conversion runs.
    #[must_use]
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Webm => Some("webm"),
            Self::Gif => Some("gif"),
            Self::Png => Some("png"),
            Self::None => None,
        }
    }
}

impl std::str::FromStr for UgoiraFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webm" => Ok(Self::Webm),
            "gif" => Ok(Self::Gif),
            "png" | "apng" => Ok(Self::Png),
            "none" | "zip" => Ok(Self::None),
            other => Err(format!("unknown animation format '{other}'")),
        }
    }
}

/// Account tier, which decides the hard page cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    /// Standard account, capped at [`STANDARD_PAGE_CAP`] pages.
    #[default]
    Standard,
    /// Premium account, capped at [`PREMIUM_PAGE_CAP`] pages.
    Premium,
}

impl AccountTier {
    /// Maximum number of list pages the platform serves for this tier.
    #[must_use]
    pub fn page_cap(self) -> u32 {
        match self {
            Self::Standard => STANDARD_PAGE_CAP,
            Self::Premium => PREMIUM_PAGE_CAP,
        }
    }
}

/// What to do when image dimensions cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DimensionFetchPolicy {
    /// Treat the item as passing the dimension filter.
    #[default]
    FailOpen,
    /// Reject the item.
    Strict,
}

/// Aspect ratio constraint.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RatioRule {
    /// Width strictly greater than height.
    Landscape,
    /// Height strictly greater than width.
    Portrait,
    /// Width equals height.
    Square,
    /// width / height must be at least this value.
    AtLeast(f64),
    /// width / height must be at most this value.
    AtMost(f64),
}

/// Color constraint applied to a sampled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRule {
    /// Reject images whose samples are all gray.
    RejectGrayscale,
    /// Reject images whose samples are all near black or near white.
    RejectBlackWhite,
    /// Keep only grayscale images.
    OnlyGrayscale,
}

/// Width/height constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct DimensionRule {
    /// Minimum width in pixels.
    pub min_width: u32,
    /// Minimum height in pixels.
    pub min_height: u32,
    /// When true both minimums must hold, otherwise either one suffices.
    pub require_both: bool,
}

/// Byte-size range constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct SizeRule {
    /// Minimum size in bytes.
    pub min_bytes: u64,
    /// Maximum size in bytes, `None` for unbounded.
    pub max_bytes: Option<u64>,
}

/// Filter configuration shared by the list-time and download-time gates.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct FilterSettings {
    /// Work kinds excluded at list time.
    pub excluded_kinds: Vec<crate::model::WorkKind>,
    /// Items carrying any of these tags are rejected (case-insensitive).
    pub excluded_tags: Vec<String>,
    /// Minimum bookmark count.
    pub min_bookmarks: Option<u32>,
    /// Reject age-restricted works.
    pub exclude_restricted: bool,
    /// Width/height filter; `None` disables it.
    pub dimensions: Option<DimensionRule>,
    /// Aspect-ratio filter; `None` disables it.
    pub ratio: Option<RatioRule>,
    /// Byte-size filter; `None` disables it.
    pub size: Option<SizeRule>,
    /// Color filter; `None` disables it.
    pub color: Option<ColorRule>,
}

impl FilterSettings {
    /// Whether width/height or ratio checks are configured.
    #[must_use]
    pub fn width_height_active(&self) -> bool {
        self.dimensions.is_some() || self.ratio.is_some()
    }

    /// Whether the byte-size check is configured.
    #[must_use]
    pub fn size_active(&self) -> bool {
        self.size.is_some()
    }

    /// Whether the color check is configured.
    #[must_use]
    pub fn color_active(&self) -> bool {
        self.color.is_some()
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Attempts per file before the terminal decision.
    pub max_retry: u32,
    /// Concurrent list-page fetch loops.
    pub max_threads: usize,
    /// Concurrent file downloads (also the number of progress slots).
    pub download_threads: usize,
    /// Size variant requested for image works.
    pub image_size: ImageSize,
    /// Conversion target for animated works.
    pub ugoira_format: UgoiraFormat,
    /// Whether animated works are downloaded at all.
    pub download_animated: bool,
    /// Dimension fetch failure handling.
    pub dimension_fetch_policy: DimensionFetchPolicy,
    /// Account tier for the page cap.
    pub account_tier: AccountTier,
    /// Items per list page.
    pub page_size: u32,
    /// Filter predicates.
    pub filters: FilterSettings,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            max_threads: DEFAULT_MAX_THREADS,
            download_threads: DEFAULT_DOWNLOAD_THREADS,
            image_size: ImageSize::default(),
            ugoira_format: UgoiraFormat::default(),
            download_animated: true,
            dimension_fetch_policy: DimensionFetchPolicy::default(),
            account_tier: AccountTier::default(),
            page_size: DEFAULT_PAGE_SIZE,
            filters: FilterSettings::default(),
        }
    }
}

impl DownloadSettings {
    /// Validates ranges and filter bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !MAX_RETRY_RANGE.contains(&self.max_retry) {
            return Err(ConfigError::invalid(
                "max_retry",
                format!("{} is outside 1..=100", self.max_retry),
            ));
        }
        if !THREAD_RANGE.contains(&self.max_threads) {
            return Err(ConfigError::invalid(
                "max_threads",
                format!("{} is outside 1..=10", self.max_threads),
            ));
        }
        if !THREAD_RANGE.contains(&self.download_threads) {
            return Err(ConfigError::invalid(
                "download_threads",
                format!("{} is outside 1..=10", self.download_threads),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::invalid("page_size", "must be at least 1"));
        }
        if let Some(size) = self.filters.size
            && let Some(max) = size.max_bytes
            && max < size.min_bytes
        {
            return Err(ConfigError::invalid(
                "filters.size",
                format!("max_bytes {max} is below min_bytes {}", size.min_bytes),
            ));
        }
        if let Some(RatioRule::AtLeast(v) | RatioRule::AtMost(v)) = self.filters.ratio
            && !(v.is_finite() && v > 0.0)
        {
            return Err(ConfigError::invalid(
                "filters.ratio",
                format!("{v} is not a positive ratio"),
            ));
        }
        Ok(())
    }
}

/// Loads settings from a JSON file and validates them.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed, or fails
/// validation.
pub fn load_settings(path: &Path) -> Result<DownloadSettings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: DownloadSettings =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.validate()?;
    debug!(path = %path.display(), "loaded settings file");
    Ok(settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DownloadSettings::default();
        assert_eq!(settings.max_retry, 10);
        assert_eq!(settings.max_threads, 5);
        assert_eq!(settings.image_size, ImageSize::Original);
        assert_eq!(settings.ugoira_format, UgoiraFormat::None);
        assert!(settings.download_animated);
        assert!(!settings.filters.width_height_active());
        assert!(!settings.filters.size_active());
        assert!(!settings.filters.color_active());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: DownloadSettings = serde_json::from_str(
            r#"{ "filters": { "size": { "max_bytes": 10000000 }, "color": "reject_grayscale" } }"#,
        )
        .unwrap();
        assert_eq!(settings.max_retry, DEFAULT_MAX_RETRY);
        assert!(settings.filters.size_active());
        assert_eq!(settings.filters.size.unwrap().min_bytes, 0);
        assert_eq!(settings.filters.color, Some(ColorRule::RejectGrayscale));
    }

    #[test]
    fn test_ratio_rule_parses_tagged_form() {
        let settings: DownloadSettings = serde_json::from_str(
            r#"{ "filters": { "ratio": { "kind": "at_least", "value": 1.5 } } }"#,
        )
        .unwrap();
        assert_eq!(settings.filters.ratio, Some(RatioRule::AtLeast(1.5)));
        assert!(settings.filters.width_height_active());
    }

    #[test]
    fn test_validate_rejects_zero_retry() {
        let settings = DownloadSettings {
            max_retry: 0,
            ..DownloadSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_retry"));
    }

    #[test]
    fn test_validate_rejects_inverted_size_range() {
        let mut settings = DownloadSettings::default();
        settings.filters.size = Some(SizeRule {
            min_bytes: 100,
            max_bytes: Some(10),
        });
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                field: "filters.size",
                ..
            })
        ));
    }

    #[test]
    fn test_page_cap_by_tier() {
        assert_eq!(AccountTier::Standard.page_cap(), 1000);
        assert_eq!(AccountTier::Premium.page_cap(), 5000);
    }

    #[test]
    fn test_from_str_variants() {
        assert_eq!("THUMB".parse::<ImageSize>().unwrap(), ImageSize::Thumb);
        assert_eq!("apng".parse::<UgoiraFormat>().unwrap(), UgoiraFormat::Png);
        assert!("tiff".parse::<UgoiraFormat>().is_err());
    }

    #[test]
    fn test_load_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_threads": 3, "download_animated": false }}"#).unwrap();
        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.max_threads, 3);
        assert!(!settings.download_animated);
    }

    #[test]
    fn test_load_settings_reports_parse_error_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_settings(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
