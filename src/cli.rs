//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use artwork_downloader::config::{
    AccountTier, DimensionFetchPolicy, DownloadSettings, ImageSize, UgoiraFormat,
};

/// Crawl artwork list pages and batch download the works they reference.
///
/// The list source is a path under the API base, e.g. `search/illustrations`
/// or `users/11/works`; extra query parameters go in `--param`.
#[derive(Parser, Debug)]
#[command(name = "artwork-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// List source path under the API base
    pub source: Option<String>,

    /// Base URL of the JSON API
    #[arg(long, value_name = "URL")]
    pub api_base: Option<Url>,

    /// Extra list query parameter (repeatable)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Settings file (JSON); flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Attempts per file before giving up (1-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max_retry: Option<u32>,

    /// Concurrent list-page fetches (1-10)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub threads: Option<u8>,

    /// Concurrent file downloads (1-10)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub download_threads: Option<u8>,

    /// Image size variant: original, regular, small, thumb
    #[arg(long, value_name = "SIZE")]
    pub size: Option<ImageSize>,

    /// Animation target format: gif, png (animated), none; webm keeps the archive
    #[arg(long, value_name = "FORMAT")]
    pub ugoira_format: Option<UgoiraFormat>,

    /// Skip animated works entirely
    #[arg(long)]
    pub no_animated: bool,

    /// Reject images whose dimensions cannot be fetched
    #[arg(long)]
    pub strict_dimensions: bool,

    /// Directory downloaded files are written under
    #[arg(short = 'o', long, default_value = "downloads")]
    pub output_dir: PathBuf,

    /// First list page to crawl
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_page: u32,

    /// Number of list pages to crawl (default: all remaining)
    #[arg(long)]
    pub pages: Option<u32>,

    /// Use the premium account page cap
    #[arg(long)]
    pub premium: bool,

    /// Cookie header sent to the API and image hosts
    #[arg(long, value_name = "COOKIE")]
    pub cookie: Option<String>,

    /// Referer header sent with every request
    #[arg(long, value_name = "URL")]
    pub referer: Option<String>,

    /// Re-attempt unresolved failures once after the run
    #[arg(long)]
    pub retry_failed: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// Overrides file or default settings with the flags that were given.
    pub fn apply_to(&self, settings: &mut DownloadSettings) {
        if let Some(max_retry) = self.max_retry {
            settings.max_retry = max_retry;
        }
        if let Some(threads) = self.threads {
            settings.max_threads = usize::from(threads);
        }
        if let Some(threads) = self.download_threads {
            settings.download_threads = usize::from(threads);
        }
        if let Some(size) = self.size {
            settings.image_size = size;
        }
        if let Some(format) = self.ugoira_format {
            settings.ugoira_format = format;
        }
        if self.no_animated {
            settings.download_animated = false;
        }
        if self.strict_dimensions {
            settings.dimension_fetch_policy = DimensionFetchPolicy::Strict;
        }
        if self.premium {
            settings.account_tier = AccountTier::Premium;
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["artwork-downloader"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.source.is_none());
        assert_eq!(args.start_page, 1);
        assert_eq!(args.output_dir, PathBuf::from("downloads"));
        assert!(args.params.is_empty());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["artwork-downloader", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["artwork-downloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["artwork-downloader", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["artwork-downloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["artwork-downloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Source Tests ====================

    #[test]
    fn test_cli_source_and_params() {
        let args = Args::try_parse_from([
            "artwork-downloader",
            "search/illustrations",
            "--api-base",
            "https://api.example/ajax/",
            "-P",
            "word=cat",
            "--param",
            "order=date_d",
        ])
        .unwrap();
        assert_eq!(args.source.as_deref(), Some("search/illustrations"));
        assert_eq!(args.api_base.unwrap().host_str(), Some("api.example"));
        assert_eq!(
            args.params,
            vec![
                ("word".to_string(), "cat".to_string()),
                ("order".to_string(), "date_d".to_string())
            ]
        );
    }

    #[test]
    fn test_cli_param_without_equals_rejected() {
        let err = Args::try_parse_from(["artwork-downloader", "-P", "word"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_api_base_rejected() {
        let result = Args::try_parse_from(["artwork-downloader", "--api-base", "not a url"]);
        assert!(result.is_err());
    }

    // ==================== Settings Override Tests ====================

    #[test]
    fn test_cli_overrides_apply_to_settings() {
        let args = Args::try_parse_from([
            "artwork-downloader",
            "--max-retry",
            "3",
            "--threads",
            "2",
            "--download-threads",
            "4",
            "--size",
            "regular",
            "--ugoira-format",
            "gif",
            "--no-animated",
            "--strict-dimensions",
            "--premium",
        ])
        .unwrap();
        let mut settings = DownloadSettings::default();

        args.apply_to(&mut settings);

        assert_eq!(settings.max_retry, 3);
        assert_eq!(settings.max_threads, 2);
        assert_eq!(settings.download_threads, 4);
        assert_eq!(settings.image_size, ImageSize::Regular);
        assert_eq!(settings.ugoira_format, UgoiraFormat::Gif);
        assert!(!settings.download_animated);
        assert_eq!(settings.dimension_fetch_policy, DimensionFetchPolicy::Strict);
        assert_eq!(settings.account_tier, AccountTier::Premium);
    }

    #[test]
    fn test_cli_absent_flags_keep_file_values() {
        let args = Args::try_parse_from(["artwork-downloader"]).unwrap();
        let mut settings = DownloadSettings {
            max_retry: 42,
            max_threads: 7,
            ..DownloadSettings::default()
        };

        args.apply_to(&mut settings);

        assert_eq!(settings.max_retry, 42);
        assert_eq!(settings.max_threads, 7);
        assert!(settings.download_animated);
    }

    #[test]
    fn test_cli_threads_over_max_rejected() {
        let err = Args::try_parse_from(["artwork-downloader", "--threads", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_retry_zero_rejected() {
        let err = Args::try_parse_from(["artwork-downloader", "--max-retry", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_unknown_size_rejected() {
        let err = Args::try_parse_from(["artwork-downloader", "--size", "huge"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
