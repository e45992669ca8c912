//! CLI entry point for the artwork downloader.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use artwork_downloader::JsonApi;
use artwork_downloader::config::{DownloadSettings, UgoiraFormat, load_settings};
use artwork_downloader::crawl::{CrawlQuery, ListCrawler};
use artwork_downloader::download::{
    ClientOptions, DirectorySink, DownloadEngine, HttpDimensionFetcher, HttpFileFetcher,
    TaskContext, TaskSettings,
};
use artwork_downloader::events::{
    ChannelEvents, EventSink, Listeners, PipelineEvent, ProgressReporter,
};
use artwork_downloader::filter::FilterGate;
use artwork_downloader::orchestrator::{Orchestrator, RunReport};
use artwork_downloader::session::Session;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

mod cli;
mod progress;

use cli::Args;
use progress::{IndicatifProgress, should_show_progress};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(source = ?args.source, "CLI arguments parsed");

    let Some(source) = args.source.clone() else {
        info!("No list source given. Pass a source path and --api-base.");
        info!("Example: artwork-downloader search/illustrations --api-base https://api.example/ajax/ -P word=cat");
        return Ok(ExitCode::SUCCESS);
    };
    let api_base = args
        .api_base
        .clone()
        .context("--api-base is required when a list source is given")?;

    let settings = resolve_settings(&args)?;
    info!(
        max_retry = settings.max_retry,
        threads = settings.max_threads,
        download_threads = settings.download_threads,
        size = settings.image_size.as_str(),
        "Artwork downloader starting"
    );

    let options = ClientOptions {
        cookie: args.cookie.clone(),
        cookie_origin: Some(api_base.clone()),
        referer: args.referer.clone(),
        request_timeout: None,
    };
    let api = Arc::new(
        JsonApi::from_options(api_base, &options).context("Cannot set up API client")?,
    );
    let fetcher =
        HttpFileFetcher::from_options(&options).context("Cannot set up download client")?;
    let dimensions =
        HttpDimensionFetcher::from_options(&options).context("Cannot set up dimension client")?;

    let (log_events, event_rx) = ChannelEvents::channel();
    let event_logger = spawn_event_logger(event_rx);
    let mut listeners = Listeners::new();
    listeners.register(Arc::new(log_events));
    let events: Arc<dyn EventSink> = Arc::new(listeners);

    let show_progress =
        should_show_progress(io::stderr().is_terminal(), args.quiet, args.no_progress);
    let progress = Arc::new(IndicatifProgress::new(settings.download_threads, show_progress));

    let gate = Arc::new(FilterGate::from_settings(&settings.filters));
    let session = Arc::new(Session::new());
    let ctx = TaskContext::new(
        Arc::new(fetcher),
        Arc::new(DirectorySink::new(args.output_dir.clone())),
        session,
        TaskSettings::from(&settings),
    )
    .with_events(Arc::clone(&events))
    .with_progress(Arc::clone(&progress) as Arc<dyn ProgressReporter>)
    .with_dimensions(Arc::new(dimensions))
    .with_gate(Arc::clone(&gate));

    let crawler = ListCrawler::new(api.clone(), gate)
        .with_settings(&settings)
        .with_events(events);
    let engine = DownloadEngine::new(settings.download_threads)?;
    let orchestrator = Arc::new(
        Orchestrator::new(crawler, api, engine, ctx).with_resolve_threads(settings.max_threads),
    );

    let interrupt_target = Arc::clone(&orchestrator);
    let interrupt_listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping downloads");
            interrupt_target.stop();
        }
    });

    let query = CrawlQuery {
        source,
        params: args.params.clone(),
    };
    let run = orchestrator
        .run(&query, args.start_page, args.pages)
        .await
        .context("Download run failed");

    let outcome = match run {
        Ok(report) => {
            log_report("Download complete", &report);
            if args.retry_failed
                && report.failed > 0
                && !report.paused
                && !orchestrator.is_stopped()
            {
                let retry = orchestrator
                    .retry_failed()
                    .await
                    .context("Retry sweep failed")?;
                log_report("Retry sweep complete", &retry);
                Ok(retry.has_failures() || report.resolve_failures > 0)
            } else {
                Ok(report.has_failures())
            }
        }
        Err(e) => Err(e),
    };

    progress.finish();
    interrupt_listener.abort();
    drop(orchestrator);
    let _ = interrupt_listener.await;
    if let Err(e) = event_logger.await {
        debug!(error = %e, "event logger ended abnormally");
    }

    if outcome? {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Settings file (if any), CLI overrides, then validation.
fn resolve_settings(args: &Args) -> Result<DownloadSettings> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)
            .with_context(|| format!("Cannot load settings from '{}'", path.display()))?,
        None => DownloadSettings::default(),
    };
    args.apply_to(&mut settings);
    settings.validate().context("Invalid settings")?;

    if settings.ugoira_format == UgoiraFormat::Webm {
        warn!("WebM encoding is not available in this build; keeping frame archives");
        settings.ugoira_format = UgoiraFormat::None;
    }
    Ok(settings)
}

fn spawn_event_logger(mut rx: UnboundedReceiver<PipelineEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::DownloadError { id } => {
                    warn!(id = %id, "Download failed after all retries");
                }
                PipelineEvent::SkipDownload { id, reason } => {
                    debug!(id = %id, reason = %reason, "Download skipped");
                }
                PipelineEvent::RequestPauseDownload => {
                    error!("Downloads paused: repeated fast failures, check free disk space");
                }
                PipelineEvent::CrawlFinish => debug!("List crawl finished"),
                PipelineEvent::CrawlEmpty => info!("No works matched the list and filters"),
            }
        }
    })
}

fn log_report(message: &str, report: &RunReport) {
    info!(
        batch = report.batch_id,
        files = report.files,
        completed = report.stats.completed(),
        skipped = report.stats.skipped(),
        failed = report.stats.failed(),
        retried = report.stats.retried(),
        interrupted = report.interrupted,
        resolve_failures = report.resolve_failures,
        paused = report.paused,
        "{message}"
    );
}
