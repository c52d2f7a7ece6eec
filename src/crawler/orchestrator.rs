//! Crawl orchestration - drives one run from session check to finalization
//!
//! This module contains the main crawl loop, including:
//! - Loading and validating the session credential
//! - Dispatching pages in increasing order to a bounded worker pool
//! - Normalizing, deduplicating and persisting each page's items
//! - Applying stop conditions and classifying the run's outcome

use crate::config::Config;
use crate::crawler::dedup::{Deduplicator, SnapshotDeduplicator, StorageDeduplicator};
use crate::crawler::fetcher::{
    build_http_client, fetch_with_retry, FetchError, HttpPageFetcher, PageFetcher, RawPage,
    RetryPolicy,
};
use crate::crawler::normalizer::normalize;
use crate::runs::{RunHandle, RunLog, RunTracker};
use crate::session::{Credential, CredentialSource, HttpSessionValidator, SessionValidator};
use crate::state::{CrawlMode, CrawlState, DedupBackend, RunStatus, RunType, StopReason};
use crate::storage::{
    lock_storage, FavoriteRecord, InsertOutcome, RunRecord, Storage, StorageError, StorageResult,
};
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

/// Crawl parameters derived from configuration
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Maximum pages in flight
    pub workers: usize,
    pub mode: CrawlMode,
    pub dedup: DedupBackend,
    /// Last page to fetch when a request does not set one
    pub page_limit: Option<u32>,
    pub retry: RetryPolicy,
    /// Pause before each dispatch after the first
    pub request_delay: Duration,
    pub max_failed_pages: u32,
    pub post_url_base: String,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        let crawler = &config.crawler;
        Self {
            workers: crawler.workers.max(1) as usize,
            mode: crawler.mode,
            dedup: crawler.dedup,
            page_limit: crawler.page_limit(),
            retry: RetryPolicy::new(crawler.max_attempts, crawler.retry_delay_ms),
            request_delay: Duration::from_millis(crawler.request_delay_ms),
            max_failed_pages: crawler.max_failed_pages.max(1),
            post_url_base: config.api.post_url_base.clone(),
        }
    }
}

/// What to run
#[derive(Debug, Clone, Copy)]
pub struct RunRequest {
    pub run_type: RunType,
    /// Overrides the configured page limit
    pub page_limit: Option<u32>,
    /// Overrides the configured crawl mode
    pub mode: Option<CrawlMode>,
}

impl RunRequest {
    pub fn scheduled() -> Self {
        Self {
            run_type: RunType::Scheduled,
            page_limit: None,
            mode: None,
        }
    }

    pub fn manual(page_limit: Option<u32>) -> Self {
        Self {
            run_type: RunType::Manual,
            page_limit,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: CrawlMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// The terminal run record
    pub run: RunRecord,
    pub state: CrawlState,
    /// Why dispatch ended; `None` when the run never started crawling
    pub stop_reason: Option<StopReason>,
    /// Pages whose fetch succeeded (including the empty terminal page)
    pub pages_fetched: u32,
}

/// Per-run state shared by the workers of that run only
struct RunContext<S: Storage> {
    run_id: i64,
    credential: Credential,
    post_url_base: String,
    storage: Arc<Mutex<S>>,
    dedup: Arc<dyn Deduplicator>,
    log: Arc<RunLog>,
    items_count: AtomicU64,
    /// Ids this run inserted; meeting them again is pagination drift, not catch-up
    inserted: Mutex<HashSet<String>>,
}

impl<S: Storage> RunContext<S> {
    fn inserted_this_run(&self, id: &str) -> StorageResult<bool> {
        let inserted = self.inserted.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inserted.contains(id))
    }
}

#[derive(Debug, Default)]
struct PageSummary {
    fetched: usize,
    inserted: usize,
    duplicates: usize,
    /// The page held at least one id stored before this run
    seen_before: bool,
}

#[derive(Debug)]
enum PageResult {
    Empty,
    Processed {
        summary: PageSummary,
        total_number: Option<u64>,
    },
    Failed(FetchError),
    StorageFailed(String),
}

#[derive(Debug)]
struct PageOutcome {
    page: u32,
    result: PageResult,
}

/// Dispatch bookkeeping of one run, owned by the orchestrating task
#[derive(Debug)]
struct Dispatch {
    next_page: u32,
    page_limit: Option<u32>,
    /// Lowest page at which a stop signal fired
    stop: Option<(u32, StopReason)>,
    auth_rejected_at: Option<u32>,
    /// Pages that ended in an error, in completion order
    error_pages: Vec<u32>,
    failed_pages: u32,
    pages_fetched: u32,
    total_reported: bool,
}

impl Dispatch {
    fn new(page_limit: Option<u32>) -> Self {
        Self {
            next_page: 1,
            page_limit,
            stop: None,
            auth_rejected_at: None,
            error_pages: Vec::new(),
            failed_pages: 0,
            pages_fetched: 0,
            total_reported: false,
        }
    }

    fn record_stop(&mut self, page: u32, reason: StopReason) {
        if self.stop.map_or(true, |(lowest, _)| page < lowest) {
            self.stop = Some((page, reason));
        }
    }

    /// True for pages numbered above the lowest stop signal
    fn beyond_stop(&self, page: u32) -> bool {
        self.stop.map_or(false, |(lowest, _)| page > lowest)
    }

    /// Errors on pages past the stop page only affect what was persisted
    fn has_page_errors(&self) -> bool {
        self.error_pages.iter().any(|page| !self.beyond_stop(*page))
    }

    fn can_dispatch(&self) -> bool {
        self.stop.is_none()
            && self.auth_rejected_at.is_none()
            && self.page_limit.map_or(true, |limit| self.next_page <= limit)
    }

    fn stop_reason(&self) -> StopReason {
        if self.auth_rejected_at.is_some() {
            return StopReason::AuthRejected;
        }
        self.stop
            .map(|(_, reason)| reason)
            .unwrap_or(StopReason::PageLimit)
    }
}

/// Drives crawl runs against one storage backend
pub struct CrawlOrchestrator<S: Storage + 'static> {
    storage: Arc<Mutex<S>>,
    tracker: Arc<RunTracker<S>>,
    fetcher: Arc<dyn PageFetcher>,
    validator: Arc<dyn SessionValidator>,
    credentials: CredentialSource,
    settings: CrawlSettings,
}

impl<S: Storage + 'static> CrawlOrchestrator<S> {
    pub fn new(
        storage: Arc<Mutex<S>>,
        tracker: Arc<RunTracker<S>>,
        fetcher: Arc<dyn PageFetcher>,
        validator: Arc<dyn SessionValidator>,
        credentials: CredentialSource,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            storage,
            tracker,
            fetcher,
            validator,
            credentials,
            settings,
        }
    }

    /// Builds an orchestrator with the HTTP fetcher and validator
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash stored on every run record
    /// * `storage` - Shared storage handle
    pub fn from_config(
        config: &Config,
        config_hash: &str,
        storage: Arc<Mutex<S>>,
    ) -> Result<Self> {
        let client = build_http_client(&config.api)?;
        let fetcher = HttpPageFetcher::new(client.clone(), &config.api)?;
        let uid = config.credential.uid.clone().unwrap_or_default();
        let validator = HttpSessionValidator::new(client, &config.api, &uid)?;
        let tracker = Arc::new(RunTracker::new(
            Arc::clone(&storage),
            &config.output.logs_dir,
            config_hash,
        ));

        Ok(Self::new(
            storage,
            tracker,
            Arc::new(fetcher),
            Arc::new(validator),
            CredentialSource::File(PathBuf::from(&config.credential.cookie_path)),
            CrawlSettings::from_config(config),
        ))
    }

    pub fn tracker(&self) -> &Arc<RunTracker<S>> {
        &self.tracker
    }

    /// Loads the credential, validates it and stores the outcome
    ///
    /// Identity learned by an earlier validation of the same blob is kept
    /// when the remote check cannot be completed.
    pub async fn check_session(&self) -> Result<Credential> {
        let mut credential = self.credentials.load()?;
        if let Some(previous) = lock_storage(&self.storage)?.load_credential()? {
            credential.inherit_from(&previous);
        }

        let checked = self.validator.validate(&credential).await;
        if let Ok(validation) = &checked {
            credential.record_validation(validation, Utc::now());
        }
        lock_storage(&self.storage)?.save_credential(&credential)?;

        checked?;
        Ok(credential)
    }

    /// Executes one complete run
    pub async fn run(&self, request: RunRequest) -> Result<CrawlReport> {
        let handle = self.start_run(request.run_type)?;
        self.execute(handle, request).await
    }

    /// Opens the run record so its id is known before crawling begins
    pub fn start_run(&self, run_type: RunType) -> Result<RunHandle> {
        self.tracker.start(run_type)
    }

    /// Crawls for an opened run and finalizes it
    ///
    /// The run always ends with a terminal record: failures after the run
    /// record was created are folded into a `failed` status.
    pub async fn execute(&self, handle: RunHandle, request: RunRequest) -> Result<CrawlReport> {
        let log = handle.log();

        let credential = match self.check_session().await {
            Ok(credential) if credential.valid => credential,
            Ok(_) => {
                return self.fail_before_crawl(handle, "session credential rejected");
            }
            Err(e) => {
                let reason = format!("session check failed: {}", e);
                return self.fail_before_crawl(handle, &reason);
            }
        };
        log.info(&format!(
            "Session valid for {}",
            credential.user_name.as_deref().unwrap_or("unknown user")
        ));

        let running = enter_state(handle.run_id(), CrawlState::Idle, CrawlState::Running);
        match self.crawl(&handle, request, credential).await {
            Ok((dispatch, items_count)) => {
                self.finish_crawl(handle, running, dispatch, items_count)
            }
            Err(e) => {
                let reason = format!("run aborted: {}", e);
                log.error(&reason);
                let state = enter_state(handle.run_id(), running, CrawlState::Failed);
                let run = self
                    .tracker
                    .finish(handle, RunStatus::Failed, 0, Some(reason))?;
                Ok(CrawlReport {
                    run,
                    state,
                    stop_reason: None,
                    pages_fetched: 0,
                })
            }
        }
    }

    fn fail_before_crawl(&self, handle: RunHandle, reason: &str) -> Result<CrawlReport> {
        handle.log().error(reason);
        let state = enter_state(handle.run_id(), CrawlState::Idle, CrawlState::Failed);
        let run = self
            .tracker
            .finish(handle, RunStatus::Failed, 0, Some(reason.to_string()))?;
        Ok(CrawlReport {
            run,
            state,
            stop_reason: None,
            pages_fetched: 0,
        })
    }

    fn finish_crawl(
        &self,
        handle: RunHandle,
        running: CrawlState,
        dispatch: Dispatch,
        items_count: u64,
    ) -> Result<CrawlReport> {
        let reason = dispatch.stop_reason();
        let state = enter_state(handle.run_id(), running, reason.terminal_state());
        let failed = dispatch.auth_rejected_at.is_some();
        let degraded = dispatch.has_page_errors() || reason.is_degraded();
        let status = RunStatus::resolve(failed, degraded);

        let error_message = dispatch
            .auth_rejected_at
            .map(|page| format!("credential rejected while fetching page {}", page));

        handle.log().info(&format!("Crawl {:?}: {}", state, reason));
        let run = self
            .tracker
            .finish(handle, status, items_count, error_message)?;

        Ok(CrawlReport {
            run,
            state,
            stop_reason: Some(reason),
            pages_fetched: dispatch.pages_fetched,
        })
    }

    fn build_dedup(&self) -> StorageResult<Arc<dyn Deduplicator>> {
        Ok(match self.settings.dedup {
            DedupBackend::Storage => Arc::new(StorageDeduplicator::new(Arc::clone(&self.storage))),
            DedupBackend::Snapshot => {
                let snapshot = SnapshotDeduplicator::from_storage(&self.storage)?;
                if snapshot.is_empty() {
                    tracing::info!("No stored favorites yet, snapshot is empty");
                } else {
                    tracing::debug!("Snapshot holds {} stored ids", snapshot.len());
                }
                Arc::new(snapshot)
            }
        })
    }

    /// The dispatch loop: bounded workers, pages in increasing order
    async fn crawl(
        &self,
        handle: &RunHandle,
        request: RunRequest,
        credential: Credential,
    ) -> Result<(Dispatch, u64)> {
        let mode = request.mode.unwrap_or(self.settings.mode);
        let page_limit = request.page_limit.or(self.settings.page_limit);
        let log = handle.log();

        let ctx = Arc::new(RunContext {
            run_id: handle.run_id(),
            credential,
            post_url_base: self.settings.post_url_base.clone(),
            storage: Arc::clone(&self.storage),
            dedup: self.build_dedup()?,
            log: Arc::clone(&log),
            items_count: AtomicU64::new(0),
            inserted: Mutex::new(HashSet::new()),
        });

        log.info(&format!(
            "Crawling in {} mode with {} worker(s){}",
            mode,
            self.settings.workers,
            page_limit
                .map(|l| format!(", page limit {}", l))
                .unwrap_or_default()
        ));

        let mut dispatch = Dispatch::new(page_limit);
        let mut workers: JoinSet<PageOutcome> = JoinSet::new();

        loop {
            if dispatch.can_dispatch() && workers.len() < self.settings.workers {
                if dispatch.next_page > 1 && !self.settings.request_delay.is_zero() {
                    // Completions keep being absorbed while pausing
                    let pause = tokio::time::sleep(self.settings.request_delay);
                    tokio::pin!(pause);
                    loop {
                        tokio::select! {
                            _ = &mut pause => break,
                            Some(joined) = workers.join_next() => {
                                self.absorb(&mut dispatch, joined, mode, handle, &ctx);
                            }
                        }
                    }
                    if !dispatch.can_dispatch() {
                        continue;
                    }
                }

                let page = dispatch.next_page;
                dispatch.next_page += 1;
                tracing::debug!(run_id = ctx.run_id, page, "Dispatching page");
                workers.spawn(crawl_page(
                    Arc::clone(&ctx),
                    Arc::clone(&self.fetcher),
                    self.settings.retry,
                    page,
                ));
                continue;
            }

            match workers.join_next().await {
                Some(joined) => self.absorb(&mut dispatch, joined, mode, handle, &ctx),
                None => break,
            }
        }

        if let Some(page) = dispatch.auth_rejected_at {
            let mut rejected = ctx.credential.clone();
            rejected.invalidate();
            lock_storage(&self.storage)?.save_credential(&rejected)?;
            log.error(&format!(
                "Credential invalidated after rejection on page {}",
                page
            ));
        }

        Ok((dispatch, ctx.items_count.load(Ordering::SeqCst)))
    }

    /// Applies one completed page to the dispatch state
    fn absorb(
        &self,
        dispatch: &mut Dispatch,
        joined: std::result::Result<PageOutcome, JoinError>,
        mode: CrawlMode,
        handle: &RunHandle,
        ctx: &RunContext<S>,
    ) {
        let log = &ctx.log;
        let PageOutcome { page, result } = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log.error(&format!("Page worker aborted: {}", e));
                let last_dispatched = dispatch.next_page.saturating_sub(1);
                self.count_failed_page(dispatch, last_dispatched);
                return;
            }
        };

        match result {
            PageResult::Empty => {
                dispatch.pages_fetched += 1;
                log.info(&format!("Page {} is empty, no more favorites", page));
                dispatch.record_stop(page, StopReason::Exhausted);
            }
            PageResult::Processed {
                summary,
                total_number,
            } => {
                dispatch.pages_fetched += 1;
                if let (Some(total), false) = (total_number, dispatch.total_reported) {
                    log.info(&format!("Remote service reports {} favorites", total));
                    dispatch.total_reported = true;
                }
                log.info(&format!(
                    "Page {}: {} item(s), {} new, {} already stored",
                    page, summary.fetched, summary.inserted, summary.duplicates
                ));
                if summary.seen_before && mode == CrawlMode::Incremental {
                    log.info(&format!("Caught up with stored favorites at page {}", page));
                    dispatch.record_stop(page, StopReason::CaughtUp);
                }
                let items = ctx.items_count.load(Ordering::SeqCst);
                if let Err(e) = self.tracker.update_items(handle, items) {
                    tracing::warn!(run_id = ctx.run_id, "Failed to publish progress: {}", e);
                }
            }
            PageResult::Failed(FetchError::AuthRejected(status)) => {
                log.error(&format!(
                    "Page {} rejected with HTTP {}, stopping dispatch",
                    page, status
                ));
                dispatch.auth_rejected_at = Some(
                    dispatch
                        .auth_rejected_at
                        .map_or(page, |earlier| earlier.min(page)),
                );
                dispatch.record_stop(page, StopReason::AuthRejected);
            }
            PageResult::Failed(FetchError::MalformedResponse(detail)) => {
                dispatch.error_pages.push(page);
                log.warn(&format!("Page {} is malformed: {}", page, detail));
                dispatch.record_stop(page, StopReason::MalformedPage);
            }
            PageResult::Failed(FetchError::Transient(detail)) => {
                log.warn(&format!(
                    "Page {} failed after {} attempt(s): {}",
                    page, self.settings.retry.max_attempts, detail
                ));
                self.count_failed_page(dispatch, page);
            }
            PageResult::StorageFailed(detail) => {
                log.error(&format!("Page {} could not be stored: {}", page, detail));
                self.count_failed_page(dispatch, page);
            }
        }
    }

    fn count_failed_page(&self, dispatch: &mut Dispatch, page: u32) {
        dispatch.error_pages.push(page);
        if dispatch.beyond_stop(page) {
            return;
        }
        dispatch.failed_pages += 1;
        if dispatch.failed_pages >= self.settings.max_failed_pages {
            dispatch.record_stop(page, StopReason::FailureBudget);
        }
    }
}

/// Moves the crawl state machine, reporting transitions it forbids
fn enter_state(run_id: i64, from: CrawlState, to: CrawlState) -> CrawlState {
    match from.advance(to) {
        Some(state) => {
            tracing::debug!(run_id, "Crawl state {:?} -> {:?}", from, state);
            state
        }
        None => {
            tracing::error!(run_id, "Illegal crawl transition {:?} -> {:?}", from, to);
            to
        }
    }
}

/// Worker body: fetch one page with retries, then normalize and persist it
async fn crawl_page<S: Storage + 'static>(
    ctx: Arc<RunContext<S>>,
    fetcher: Arc<dyn PageFetcher>,
    retry: RetryPolicy,
    page: u32,
) -> PageOutcome {
    let result = match fetch_with_retry(fetcher.as_ref(), page, &ctx.credential, &retry).await {
        Ok(raw) => process_page(&ctx, raw),
        Err(e) => PageResult::Failed(e),
    };
    PageOutcome { page, result }
}

fn process_page<S: Storage>(ctx: &RunContext<S>, raw: RawPage) -> PageResult {
    if raw.is_empty() {
        return PageResult::Empty;
    }

    // A page is all-or-nothing: one unusable item rejects the whole page
    let collected_at = Utc::now();
    let records = match raw
        .items
        .iter()
        .map(|item| normalize(item, &ctx.post_url_base, collected_at))
        .collect::<std::result::Result<Vec<_>, _>>()
    {
        Ok(records) => records,
        Err(e) => return PageResult::Failed(e),
    };

    match persist_page(ctx, records) {
        Ok(summary) => PageResult::Processed {
            summary,
            total_number: raw.total_number,
        },
        Err(e) => PageResult::StorageFailed(e.to_string()),
    }
}

fn persist_page<S: Storage>(
    ctx: &RunContext<S>,
    records: Vec<FavoriteRecord>,
) -> StorageResult<PageSummary> {
    let mut summary = PageSummary {
        fetched: records.len(),
        ..PageSummary::default()
    };

    for record in records {
        if !ctx.dedup.is_new(&record)? {
            summary.duplicates += 1;
            if !ctx.inserted_this_run(&record.id)? {
                summary.seen_before = true;
            }
            continue;
        }

        let mut storage = lock_storage(&ctx.storage)?;
        match storage.insert_if_absent(&record)? {
            InsertOutcome::Inserted => {
                // Recorded under the storage lock so other workers see it with the row
                ctx.inserted
                    .lock()
                    .map_err(|_| StorageError::LockPoisoned)?
                    .insert(record.id.clone());
                drop(storage);
                ctx.dedup.mark_seen(&record)?;
                ctx.items_count.fetch_add(1, Ordering::SeqCst);
                summary.inserted += 1;
            }
            InsertOutcome::Duplicate => {
                drop(storage);
                summary.duplicates += 1;
                if !ctx.inserted_this_run(&record.id)? {
                    summary.seen_before = true;
                }
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::decode_page;
    use crate::session::Validation;
    use crate::storage::SqliteStorage;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use tempfile::TempDir;

    /// Serves scripted responses per page and records every request
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: Mutex<HashMap<u32, VecDeque<std::result::Result<RawPage, FetchError>>>>,
        requested: Mutex<Vec<u32>>,
    }

    impl ScriptedFetcher {
        fn page(self, page: u32, ids: &[&str]) -> Self {
            self.respond(page, Ok(page_of(ids)))
        }

        fn respond(self, page: u32, response: std::result::Result<RawPage, FetchError>) -> Self {
            self.pages
                .lock()
                .unwrap()
                .entry(page)
                .or_default()
                .push_back(response);
            self
        }

        fn requested(&self) -> Vec<u32> {
            let mut pages = self.requested.lock().unwrap().clone();
            pages.dedup();
            pages
        }

        fn attempts(&self, page: u32) -> usize {
            self.requested
                .lock()
                .unwrap()
                .iter()
                .filter(|p| **p == page)
                .count()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            page: u32,
            _credential: &Credential,
        ) -> std::result::Result<RawPage, FetchError> {
            self.requested.lock().unwrap().push(page);
            self.pages
                .lock()
                .unwrap()
                .get_mut(&page)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| Ok(RawPage::default()))
        }
    }

    struct FixedValidator(bool);

    #[async_trait]
    impl SessionValidator for FixedValidator {
        async fn validate(
            &self,
            _credential: &Credential,
        ) -> std::result::Result<Validation, FetchError> {
            Ok(Validation {
                valid: self.0,
                user: None,
            })
        }
    }

    fn page_of(ids: &[&str]) -> RawPage {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"idstr": "{}", "text_raw": "post {}"}}"#, id, id))
            .collect();
        decode_page(&format!(r#"{{"data": [{}]}}"#, items.join(","))).unwrap()
    }

    fn settings(workers: usize) -> CrawlSettings {
        CrawlSettings {
            workers,
            mode: CrawlMode::Incremental,
            dedup: DedupBackend::Storage,
            page_limit: None,
            retry: RetryPolicy::new(3, 1),
            request_delay: Duration::ZERO,
            max_failed_pages: 3,
            post_url_base: "https://weibo.com".to_string(),
        }
    }

    struct Harness {
        _dir: TempDir,
        storage: Arc<Mutex<SqliteStorage>>,
        fetcher: Arc<ScriptedFetcher>,
        orchestrator: CrawlOrchestrator<SqliteStorage>,
    }

    fn harness(fetcher: ScriptedFetcher, valid: bool, settings: CrawlSettings) -> Harness {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let tracker = Arc::new(RunTracker::new(Arc::clone(&storage), dir.path(), "hash"));
        let fetcher = Arc::new(fetcher);
        let orchestrator = CrawlOrchestrator::new(
            Arc::clone(&storage),
            tracker,
            fetcher.clone(),
            Arc::new(FixedValidator(valid)),
            CredentialSource::Fixed(Credential::new("SUB=abc".to_string())),
            settings,
        );
        Harness {
            _dir: dir,
            storage,
            fetcher,
            orchestrator,
        }
    }

    fn seed(storage: &Arc<Mutex<SqliteStorage>>, ids: &[&str]) {
        let page = page_of(ids);
        let mut storage = storage.lock().unwrap();
        for item in &page.items {
            let record = normalize(item, "https://weibo.com", Utc::now()).unwrap();
            storage.insert_if_absent(&record).unwrap();
        }
    }

    fn stored(storage: &Arc<Mutex<SqliteStorage>>, id: &str) -> bool {
        storage.lock().unwrap().contains_favorite(id).unwrap()
    }

    #[tokio::test]
    async fn test_empty_page_completes_run() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["a1", "a2"])
            .page(2, &["b1", "b2"])
            .page(3, &[]);
        let h = harness(fetcher, true, settings(2));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.state, CrawlState::Completed);
        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(report.run.items_count, 4);
        assert_eq!(h.storage.lock().unwrap().count_favorites().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_no_page_dispatched_past_stop_signal() {
        let fetcher = ScriptedFetcher::default().page(1, &["a1"]).page(2, &[]);
        let h = harness(fetcher, true, settings(1));

        h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(h.fetcher.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_repeated_id_across_pages_inserted_once() {
        // Pagination drift: "x" shows up on both pages
        let fetcher = ScriptedFetcher::default()
            .page(1, &["x", "y"])
            .page(2, &["x", "z"])
            .page(3, &[]);
        let h = harness(fetcher, true, settings(2));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.items_count, 3);
        assert_eq!(h.storage.lock().unwrap().count_favorites().unwrap(), 3);
        // Ids inserted by this run never count as catch-up
        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn test_auth_rejection_fails_run_and_halts_dispatch() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["a1"])
            .respond(2, Err(FetchError::AuthRejected(401)))
            .page(3, &["c1"]);
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Failed);
        assert_eq!(report.state, CrawlState::Failed);
        assert_eq!(report.stop_reason, Some(StopReason::AuthRejected));
        assert_eq!(h.fetcher.requested(), vec![1, 2]);
        assert_eq!(h.fetcher.attempts(2), 1);
        assert!(stored(&h.storage, "a1"));

        let credential = h.storage.lock().unwrap().load_credential().unwrap().unwrap();
        assert!(!credential.valid);
    }

    #[tokio::test]
    async fn test_incremental_stops_at_catch_up() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["C", "A", "B"])
            .page(2, &["older"]);
        let h = harness(fetcher, true, settings(1));
        seed(&h.storage, &["A", "B"]);

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.run.items_count, 1);
        assert!(stored(&h.storage, "C"));
        assert!(!stored(&h.storage, "older"));
        assert_eq!(h.fetcher.requested(), vec![1]);
    }

    #[tokio::test]
    async fn test_snapshot_backend_catches_up() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["C", "A", "B"])
            .page(2, &["older"]);
        let mut snapshot = settings(1);
        snapshot.dedup = DedupBackend::Snapshot;
        let h = harness(fetcher, true, snapshot);
        seed(&h.storage, &["A", "B"]);

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
        assert_eq!(report.run.items_count, 1);
    }

    #[tokio::test]
    async fn test_full_scan_ignores_catch_up() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["C", "A", "B"])
            .page(2, &["D"])
            .page(3, &[]);
        let h = harness(fetcher, true, settings(1));
        seed(&h.storage, &["A", "B"]);

        let report = h
            .orchestrator
            .run(RunRequest::manual(None).with_mode(CrawlMode::FullScan))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(report.run.items_count, 2);
        assert!(stored(&h.storage, "D"));
    }

    #[tokio::test]
    async fn test_transient_failures_within_budget_keep_success() {
        let fetcher = ScriptedFetcher::default()
            .respond(1, Err(FetchError::Transient("HTTP 503".into())))
            .respond(1, Err(FetchError::Transient("timeout".into())))
            .page(1, &["a1", "a2"])
            .page(2, &[]);
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.run.items_count, 2);
        assert_eq!(h.fetcher.attempts(1), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_downgrade_to_warning() {
        let fetcher = ScriptedFetcher::default()
            .respond(1, Err(FetchError::Transient("HTTP 502".into())))
            .respond(1, Err(FetchError::Transient("HTTP 502".into())))
            .respond(1, Err(FetchError::Transient("HTTP 502".into())))
            .page(2, &["b1"])
            .page(3, &[]);
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Warning);
        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
        assert!(stored(&h.storage, "b1"));
    }

    #[tokio::test]
    async fn test_failure_budget_halts_dispatch() {
        let mut fetcher = ScriptedFetcher::default();
        for page in 1..=10 {
            for _ in 0..3 {
                fetcher = fetcher.respond(page, Err(FetchError::Transient("down".into())));
            }
        }
        let mut budget = settings(1);
        budget.max_failed_pages = 2;
        let h = harness(fetcher, true, budget);

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Warning);
        assert_eq!(report.stop_reason, Some(StopReason::FailureBudget));
        assert_eq!(h.fetcher.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_malformed_page_ends_run_with_warning() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["a1"])
            .respond(2, Err(FetchError::MalformedResponse("missing data".into())))
            .page(3, &["c1"]);
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Warning);
        assert_eq!(report.stop_reason, Some(StopReason::MalformedPage));
        assert!(stored(&h.storage, "a1"));
        assert!(!stored(&h.storage, "c1"));
    }

    #[tokio::test]
    async fn test_errors_past_empty_page_keep_success() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["a1"])
            .page(2, &[])
            .respond(3, Err(FetchError::MalformedResponse("missing data".into())));
        let h = harness(fetcher, true, settings(3));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(report.run.items_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_past_empty_page_keep_success() {
        let mut fetcher = ScriptedFetcher::default().page(1, &["a1"]).page(2, &[]);
        for _ in 0..3 {
            fetcher = fetcher.respond(3, Err(FetchError::Transient("HTTP 503".into())));
        }
        let h = harness(fetcher, true, settings(3));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn test_item_without_id_rejects_page() {
        let broken = decode_page(r#"{"data": [{"idstr": "ok1"}, {"text": "no id"}]}"#).unwrap();
        let fetcher = ScriptedFetcher::default().respond(1, Ok(broken));
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Warning);
        assert!(!stored(&h.storage, "ok1"));
    }

    #[tokio::test]
    async fn test_invalid_session_fails_without_fetching() {
        let fetcher = ScriptedFetcher::default().page(1, &["a1"]);
        let h = harness(fetcher, false, settings(2));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();

        assert_eq!(report.run.status, RunStatus::Failed);
        assert_eq!(report.state, CrawlState::Failed);
        assert!(report.stop_reason.is_none());
        assert!(h.fetcher.requested().is_empty());
        assert!(report.run.error_message.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_page_limit() {
        let fetcher = ScriptedFetcher::default()
            .page(1, &["a1"])
            .page(2, &["b1"])
            .page(3, &["c1"]);
        let h = harness(fetcher, true, settings(2));

        let report = h
            .orchestrator
            .run(RunRequest::manual(Some(2)))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.stop_reason, Some(StopReason::PageLimit));
        assert_eq!(report.state, CrawlState::Stopped);
        assert_eq!(h.fetcher.requested().iter().max(), Some(&2));
        assert_eq!(report.run.items_count, 2);
    }

    #[tokio::test]
    async fn test_run_log_records_pages() {
        let fetcher = ScriptedFetcher::default().page(1, &["a1"]).page(2, &[]);
        let h = harness(fetcher, true, settings(1));

        let report = h.orchestrator.run(RunRequest::manual(None)).await.unwrap();
        let log = h
            .orchestrator
            .tracker()
            .get_run_log(report.run.run_id)
            .unwrap();

        assert!(log.contains("Page 1: 1 item(s), 1 new"));
        assert!(log.contains("Page 2 is empty"));
        assert!(log.contains("finished: success"));
    }

    #[test]
    fn test_lowest_stop_page_wins() {
        let mut dispatch = Dispatch::new(None);
        dispatch.record_stop(5, StopReason::CaughtUp);
        dispatch.record_stop(3, StopReason::Exhausted);
        dispatch.record_stop(4, StopReason::MalformedPage);

        assert_eq!(dispatch.stop, Some((3, StopReason::Exhausted)));
        assert!(!dispatch.can_dispatch());
    }
}
