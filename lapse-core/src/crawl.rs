use crate::data::Database;
use crate::sink::SqliteSink;
use indicatif::{ProgressBar, ProgressStyle};
use lapse_scanner::engine::{CrawlEngine, CrawlEvent, EngineConfig, ProgressCallback, validate_seed};
use lapse_scanner::error::ScanError;
use lapse_scanner::fetch::{FetchConfig, HttpFetcher};
use lapse_scanner::liveness::{DEFAULT_PROBE_TIMEOUT, LivenessChecker};
use lapse_scanner::result::CrawlSummary;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Options for configuring a crawl operation
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub start_url: String,
    pub project_id: String,
    pub concurrency: usize,
    pub liveness_concurrency: usize,
    pub per_host_delay: Duration,
    pub probe_timeout: Duration,
    pub obey_robots: bool,
    pub show_progress: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let fetch = FetchConfig::default();
        Self {
            start_url: String::new(),
            project_id: String::new(),
            concurrency: engine.concurrency,
            liveness_concurrency: engine.liveness_concurrency,
            per_host_delay: fetch.per_host_delay,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            obey_robots: fetch.obey_robots,
            show_progress: true,
        }
    }
}

impl CrawlOptions {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.concurrency,
            liveness_concurrency: self.liveness_concurrency,
            ..EngineConfig::default()
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            per_host_delay: self.per_host_delay,
            obey_robots: self.obey_robots,
            ..FetchConfig::default()
        }
    }
}

#[derive(Default)]
struct Tally {
    pages: AtomicUsize,
    domains: AtomicUsize,
    expired: AtomicUsize,
}

impl Tally {
    fn message(&self) -> String {
        format!(
            "Crawled {} pages, checked {} domains ({} expired)",
            self.pages.load(Ordering::Relaxed),
            self.domains.load(Ordering::Relaxed),
            self.expired.load(Ordering::Relaxed)
        )
    }
}

/// Crawl a site into the project database until the frontier runs dry or
/// Ctrl-C is pressed.
///
/// The project row is created if it does not exist yet.
pub async fn execute_crawl(
    options: CrawlOptions,
    db: Arc<Mutex<Database>>,
) -> Result<CrawlSummary, ScanError> {
    let seed = validate_seed(&options.start_url, &options.project_id)?;

    let created = db
        .lock()
        .map_err(|_| ScanError::Persistence("database lock poisoned".to_string()))?
        .ensure_project(&options.project_id, &seed)
        .map_err(|e| ScanError::Persistence(e.to_string()))?;
    if created {
        info!("Created project {}", options.project_id);
    }

    let fetcher = Arc::new(HttpFetcher::new(options.fetch_config())?);
    let checker = Arc::new(LivenessChecker::system(options.probe_timeout)?);
    let sink = Arc::new(SqliteSink::new(db));

    let mut engine = CrawlEngine::new(fetcher, sink, checker).with_config(options.engine_config());

    // Set up a spinner for overall progress (only if enabled)
    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| ScanError::Other(e.to_string()))?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Starting crawl...");
        Some(pb)
    } else {
        None
    };

    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        let tally = Arc::new(Tally::default());
        let callback: ProgressCallback = Arc::new(move |event: &CrawlEvent| {
            match event {
                CrawlEvent::PageRecorded { .. } => {
                    tally.pages.fetch_add(1, Ordering::Relaxed);
                }
                CrawlEvent::DomainChecked { domain, verdict } => {
                    tally.domains.fetch_add(1, Ordering::Relaxed);
                    if verdict.is_expired() {
                        tally.expired.fetch_add(1, Ordering::Relaxed);
                        pb.println(format!("[!] {} looks expired", domain));
                    }
                }
            }
            pb.set_message(tally.message());
        });
        engine = engine.with_progress_callback(callback);
    }

    let stop = engine.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work");
            stop.stop();
        }
    });

    let outcome = engine.run(&seed, &options.project_id).await;
    interrupt.abort();

    if let Some(pb) = progress_bar {
        match &outcome {
            Ok(summary) if summary.stopped => pb.finish_with_message("Crawl stopped"),
            Ok(_) => pb.finish_with_message("Crawl complete!"),
            Err(_) => pb.finish_and_clear(),
        }
    }

    outcome
}
