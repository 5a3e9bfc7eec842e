use crate::error::{Result, ScanError};
use crate::extract::{LinkExtractor, LinkKind, domain_of};
use crate::fetch::Fetcher;
use crate::frontier::{Frontier, normalize_url};
use crate::liveness::LivenessChecker;
use crate::result::{CrawlRecord, CrawlSummary, CrawlTarget, DomainVerdict, Verdict};
use crate::sink::RecordSink;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Something worth telling the user about while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    PageRecorded { url: String, status: Option<u16> },
    DomainChecked { domain: String, verdict: Verdict },
}

pub type ProgressCallback = Arc<dyn Fn(&CrawlEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Done,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Page fetches in flight at once.
    pub concurrency: usize,
    /// Liveness checks in flight at once, independent of page fetches.
    pub liveness_concurrency: usize,
    /// URLs queued for a worker at once. Links found past this depth wait
    /// with the page that found them until the queue has room.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            liveness_concurrency: 16,
            queue_depth: 1024,
        }
    }
}

/// Cooperative cancellation for a running crawl.
///
/// Once stopped, no new page fetches start; fetches and liveness checks
/// already under way are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CrawlEngine {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn RecordSink>,
    checker: Arc<LivenessChecker>,
    frontier: Arc<Frontier>,
    config: EngineConfig,
    state: StdMutex<EngineState>,
    stop: StopHandle,
    progress_callback: Option<ProgressCallback>,
}

/// Everything a page task needs, cheap to clone into each spawned task.
#[derive(Clone)]
struct PageContext {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn RecordSink>,
    frontier: Arc<Frontier>,
    project_id: Arc<str>,
    site_domain: Arc<OnceLock<String>>,
    progress_callback: Option<ProgressCallback>,
}

/// FIFO of crawl targets with a bounded ready queue. Batches that do not fit
/// are parked whole and fed in as workers drain the queue.
struct WorkQueue {
    depth: usize,
    ready: VecDeque<CrawlTarget>,
    parked: VecDeque<std::vec::IntoIter<CrawlTarget>>,
}

impl WorkQueue {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            ready: VecDeque::with_capacity(depth.min(1024)),
            parked: VecDeque::new(),
        }
    }

    fn push_batch(&mut self, targets: Vec<CrawlTarget>) {
        if !targets.is_empty() {
            self.parked.push_back(targets.into_iter());
            self.refill();
        }
    }

    fn pop(&mut self) -> Option<CrawlTarget> {
        let target = self.ready.pop_front();
        self.refill();
        target
    }

    fn refill(&mut self) {
        while self.ready.len() < self.depth
            && let Some(batch) = self.parked.front_mut()
        {
            match batch.next() {
                Some(target) => self.ready.push_back(target),
                None => {
                    self.parked.pop_front();
                }
            }
        }
    }

    fn ready_len(&self) -> usize {
        self.ready.len()
    }

    fn len(&self) -> usize {
        self.ready.len() + self.parked.iter().map(|batch| batch.len()).sum::<usize>()
    }

    fn clear(&mut self) {
        self.ready.clear();
        self.parked.clear();
    }
}

#[derive(Default)]
struct PageOutcome {
    record: Option<CrawlRecord>,
    new_targets: Vec<CrawlTarget>,
    new_domains: Vec<String>,
}

impl CrawlEngine {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn RecordSink>,
        checker: Arc<LivenessChecker>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            checker,
            frontier: Arc::new(Frontier::new()),
            config: EngineConfig::default(),
            state: StdMutex::new(EngineState::Idle),
            stop: StopHandle::default(),
            progress_callback: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> EngineState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    fn set_state(&self, next: EngineState) {
        debug!("Engine state -> {:?}", next);
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Crawl everything reachable from `start_url` on the same host and check
    /// every external domain it links to.
    ///
    /// Only configuration problems are returned as errors, and they are
    /// returned before anything is fetched. Failures during the crawl are
    /// logged and the run carries on.
    pub async fn run(&self, start_url: &str, project_id: &str) -> Result<CrawlSummary> {
        let seed = self.validate(start_url, project_id)?;

        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state != EngineState::Idle {
                return Err(ScanError::Config(
                    "a crawl engine can only run once".to_string(),
                ));
            }
            *state = EngineState::Running;
        }

        info!(
            "Starting crawl of {} for project {} with {} workers",
            seed, project_id, self.config.concurrency
        );

        let ctx = PageContext {
            fetcher: self.fetcher.clone(),
            sink: self.sink.clone(),
            frontier: self.frontier.clone(),
            project_id: Arc::from(project_id),
            site_domain: Arc::new(OnceLock::new()),
            progress_callback: self.progress_callback.clone(),
        };
        let liveness_permits = Arc::new(Semaphore::new(self.config.liveness_concurrency));

        let mut pending = WorkQueue::new(self.config.queue_depth);
        let mut pages: JoinSet<PageOutcome> = JoinSet::new();
        let mut checks: JoinSet<DomainVerdict> = JoinSet::new();
        let mut summary = CrawlSummary::default();

        if self.frontier.enqueue_if_new(&seed) {
            pending.push_batch(vec![CrawlTarget::seed(seed)]);
        }

        loop {
            if self.stop.is_stopped() && !summary.stopped {
                info!(
                    "Stop requested, dropping {} queued URLs and finishing {} in flight",
                    pending.len(),
                    pages.len()
                );
                summary.stopped = true;
            }
            if summary.stopped {
                pending.clear();
            }

            while pages.len() < self.config.concurrency
                && let Some(target) = pending.pop()
            {
                pages.spawn(process_page(ctx.clone(), target));
            }

            let Some(joined) = pages.join_next().await else {
                break;
            };

            match joined {
                Ok(outcome) => {
                    if let Some(record) = outcome.record {
                        summary.pages_crawled += 1;
                        if record.is_failure() {
                            summary.pages_failed += 1;
                        }
                    }
                    pending.push_batch(outcome.new_targets);
                    debug!(
                        "{} URLs ready, {} waiting for room",
                        pending.ready_len(),
                        pending.len() - pending.ready_len()
                    );
                    for domain in outcome.new_domains {
                        self.spawn_liveness_check(&mut checks, &liveness_permits, &ctx, domain);
                    }
                }
                Err(e) => warn!("Page task failed: {}", e),
            }
        }

        self.set_state(EngineState::Draining);
        debug!("Fetch queue empty, waiting on {} liveness checks", checks.len());

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(verdict) => {
                    summary.domains_checked += 1;
                    if verdict.is_expired {
                        summary.domains_expired += 1;
                    }
                }
                Err(e) => warn!("Liveness task failed: {}", e),
            }
        }

        self.set_state(EngineState::Done);
        info!(
            "Crawl complete. {} pages ({} failed), {} external domains ({} expired)",
            summary.pages_crawled,
            summary.pages_failed,
            summary.domains_checked,
            summary.domains_expired
        );

        Ok(summary)
    }

    fn validate(&self, start_url: &str, project_id: &str) -> Result<String> {
        let seed = validate_seed(start_url, project_id)?;
        if self.config.concurrency == 0
            || self.config.liveness_concurrency == 0
            || self.config.queue_depth == 0
        {
            return Err(ScanError::Config(
                "concurrency limits and queue depth must be at least 1".to_string(),
            ));
        }
        Ok(seed)
    }

    fn spawn_liveness_check(
        &self,
        checks: &mut JoinSet<DomainVerdict>,
        permits: &Arc<Semaphore>,
        ctx: &PageContext,
        domain: String,
    ) {
        let checker = self.checker.clone();
        let permits = permits.clone();
        let ctx = ctx.clone();

        checks.spawn(async move {
            // The semaphore is never closed, so this only waits
            let _permit = permits.acquire_owned().await.ok();

            let verdict = checker.check(&domain).await;
            debug!("{} is {}", domain, verdict.as_str());

            let record = DomainVerdict::new(&ctx.project_id, &domain, verdict);
            if let Err(e) = ctx.sink.record_domain_verdict(&record).await {
                warn!("Failed to record verdict for {}: {}", domain, e);
            }
            if let Some(ref callback) = ctx.progress_callback {
                callback(&CrawlEvent::DomainChecked { domain, verdict });
            }

            record
        });
    }
}

/// Check a crawl's inputs and return the seed URL with any fragment removed.
pub fn validate_seed(start_url: &str, project_id: &str) -> Result<String> {
    if project_id.trim().is_empty() {
        return Err(ScanError::Config("a project id is required".to_string()));
    }
    parse_seed_url(start_url)
}

/// Parse an http(s) start URL with a host, dropping any fragment.
pub fn parse_seed_url(start_url: &str) -> Result<String> {
    if start_url.trim().is_empty() {
        return Err(ScanError::Config("a start URL is required".to_string()));
    }

    let mut url = Url::parse(start_url.trim())
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ScanError::InvalidUrl(format!(
            "{}: only http and https URLs can be crawled",
            start_url
        )));
    }
    if domain_of(&url).is_none() {
        return Err(ScanError::InvalidUrl(format!("{}: no host", start_url)));
    }
    url.set_fragment(None);

    Ok(url.to_string())
}

impl PageContext {
    async fn record_page(&self, record: &CrawlRecord) {
        if let Err(e) = self.sink.record_page(record).await {
            warn!("Failed to record page {}: {}", record.url, e);
        }
        if let Some(ref callback) = self.progress_callback {
            callback(&CrawlEvent::PageRecorded {
                url: record.url.clone(),
                status: record.http_status,
            });
        }
    }
}

/// Fetch one page, record it, and sort its links through the frontier.
async fn process_page(ctx: PageContext, target: CrawlTarget) -> PageOutcome {
    let mut outcome = PageOutcome::default();

    let page = match ctx.fetcher.fetch(&target.url).await {
        Ok(page) => page,
        Err(ScanError::RobotsDisallowed(url)) => {
            debug!("robots.txt disallows {}, skipping", url);
            return outcome;
        }
        Err(e) => {
            warn!("Crawl error for {}: {}", target.url, e);
            let record = CrawlRecord::new(&ctx.project_id, &target.url, None);
            ctx.record_page(&record).await;
            outcome.record = Some(record);
            return outcome;
        }
    };

    let record = CrawlRecord::new(&ctx.project_id, &page.final_url, Some(page.status));
    ctx.record_page(&record).await;
    outcome.record = Some(record);

    if !page.is_success() {
        debug!("{} answered {}, not following its links", page.final_url, page.status);
        return outcome;
    }
    if !page.is_html() {
        return outcome;
    }

    // A redirect that only changes the frontier key's spelling is the same page
    if normalize_url(&page.final_url) != normalize_url(&target.url)
        && !ctx.frontier.enqueue_if_new(&page.final_url)
    {
        debug!(
            "{} redirected to already visited {}",
            target.url, page.final_url
        );
        return outcome;
    }

    let Some(page_domain) = Url::parse(&page.final_url)
        .ok()
        .and_then(|url| domain_of(&url))
    else {
        return outcome;
    };
    // The first page to land fixes the site's host, redirects included
    let site_domain = ctx.site_domain.get_or_init(|| page_domain.clone());
    if &page_domain != site_domain {
        debug!(
            "{} left {} for {}, not following its links",
            target.url, site_domain, page_domain
        );
        return outcome;
    }

    for link in LinkExtractor::extract(&page.final_url, &page.body) {
        match link.kind {
            LinkKind::Internal => {
                if ctx.frontier.enqueue_if_new(&link.url) {
                    outcome
                        .new_targets
                        .push(CrawlTarget::discovered(link.url, &page.final_url));
                }
            }
            LinkKind::External => {
                if ctx.frontier.mark_checked_if_new(&link.domain) {
                    debug!("New external domain {} on {}", link.domain, page.final_url);
                    outcome.new_domains.push(link.domain);
                }
            }
        }
    }

    outcome
}
