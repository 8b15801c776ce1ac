use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::RecordStore;
use crate::error::ScrapeError;
use crate::fetch::PageFetcher;
use crate::model::{Record, RunContext, ScrapMode};
use crate::parser::extract::extract_row;
use crate::parser::{parse_ladder_page, LadderDocument};
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub fetch_timeout: Duration,
    pub queue_capacity: usize,
    pub show_progress: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            fetch_timeout: settings.fetch_timeout(),
            queue_capacity: settings.queue_capacity,
            show_progress: false,
        }
    }
}

/// Counters of one finished (or cancelled) run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub world: String,
    pub mode: ScrapMode,
    pub total_pages: u32,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub pages_unparsed: usize,
    pub pages_extracted: usize,
    pub entries: usize,
    pub snapshots: usize,
    pub rows_skipped: usize,
    pub write_errors: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Fetches, parses and stores a whole world ladder per run.
pub struct LadderPipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn RecordStore>,
    options: PipelineOptions,
    cancel: CancellationToken,
    world_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LadderPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn RecordStore>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            store,
            options,
            cancel,
            world_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Scrape every page of `world`. Resolves once all pages went through
    /// fetch → parse → extract, or the pipeline was cancelled. A second call
    /// for a world that is still running waits for the first one.
    pub async fn run(&self, world: &str, mode: ScrapMode) -> RunReport {
        let lock = self.world_lock(world);
        let _running = lock.lock().await;

        let started = Instant::now();
        let captured_at = Utc::now();
        info!("Downloading ladder of {} world ({} mode)...", world, mode);

        let (first_page, total_pages) = self.discover(world).await;
        let job = Arc::new(Job {
            ctx: RunContext {
                world: world.to_string(),
                mode,
                captured_at,
                total_pages,
            },
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            outstanding: Outstanding::new(total_pages as usize),
            tally: Tally::default(),
            progress: progress_bar(total_pages, self.options.show_progress),
        });

        let mut cancelled = self.cancel.is_cancelled();
        if let (Some(first_page), false) = (first_page, cancelled) {
            let (body_tx, body_rx) = mpsc::channel(self.options.queue_capacity);
            let (doc_tx, doc_rx) = mpsc::channel(self.options.queue_capacity);

            let mut stages = JoinSet::new();
            stages.spawn(fetch_stage(Arc::clone(&job), first_page, body_tx));
            stages.spawn(parse_stage(Arc::clone(&job), body_rx, doc_tx));
            stages.spawn(extract_stage(Arc::clone(&job), doc_rx));

            cancelled = tokio::select! {
                _ = job.outstanding.wait_zero() => false,
                _ = self.cancel.cancelled() => true,
                _ = join_stages(&mut stages) => self.cancel.is_cancelled(),
            };
            join_stages(&mut stages).await;

            let left = job.outstanding.remaining();
            if left > 0 && !cancelled {
                warn!("{} world: stages stopped with {} pages unaccounted for", world, left);
            }
        }

        job.progress.finish_and_clear();
        let report = job.report(cancelled, started.elapsed());
        if cancelled {
            warn!(
                "Downloading ladder of {} world cancelled after {:.1}s ({}/{} pages extracted)",
                world,
                report.elapsed.as_secs_f64(),
                report.pages_extracted,
                report.total_pages
            );
        } else {
            info!(
                "Downloading ladder of {} world finished in {:.1}s: {} pages, {} entries, {} snapshots, {} rows skipped, {} pages failed, {} unparsable, {} write errors",
                world,
                report.elapsed.as_secs_f64(),
                report.pages_extracted,
                report.entries,
                report.snapshots,
                report.rows_skipped,
                report.pages_failed,
                report.pages_unparsed,
                report.write_errors
            );
        }
        report
    }

    fn world_lock(&self, world: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.world_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(world.to_string()).or_default())
    }

    /// Page 1 body and the page count it announces. Any failure degrades
    /// to an empty run.
    async fn discover(&self, world: &str) -> (Option<String>, u32) {
        let body = match fetch_with_retry(
            self.fetcher.as_ref(),
            world,
            1,
            &self.options,
            &self.cancel,
        )
        .await
        {
            Ok(body) => body,
            Err(ScrapeError::Cancelled) => return (None, 0),
            Err(e) => {
                warn!("{} world: cannot discover page count: {}", world, e);
                return (None, 0);
            }
        };

        match parse_ladder_page(1, &body) {
            Ok(doc) => {
                let total = match doc.total_pages {
                    Some(n) if n > 0 => n,
                    _ => {
                        warn!("{} world: no page count on page 1, assuming a single page", world);
                        1
                    }
                };
                debug!("{} world: {} pages", world, total);
                (Some(body), total)
            }
            Err(e) => {
                warn!("{} world: cannot discover page count: {}", world, e);
                (None, 0)
            }
        }
    }
}

/// Everything the stage workers share for one run. Built before any stage
/// starts, never mutated afterwards except through the counters.
struct Job {
    ctx: RunContext,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn RecordStore>,
    options: PipelineOptions,
    cancel: CancellationToken,
    outstanding: Outstanding,
    tally: Tally,
    progress: ProgressBar,
}

impl Job {
    fn page_done(&self) {
        self.outstanding.done();
        self.progress.inc(1);
    }

    fn extract_document(&self, doc: &LadderDocument) {
        for row in &doc.rows {
            match extract_row(&self.ctx, row) {
                Ok(records) => {
                    for record in records {
                        self.persist(record);
                    }
                }
                Err(e) => {
                    debug!("{} world, page {}: skipping row: {}", self.ctx.world, doc.page, e);
                    bump(&self.tally.rows_skipped);
                }
            }
        }
        bump(&self.tally.pages_extracted);
    }

    fn persist(&self, record: Record) {
        let (result, counter) = match &record {
            Record::Entry(entry) => (self.store.upsert_ladder_entry(entry), &self.tally.entries),
            Record::Level(snap) => (self.store.insert_level_snapshot(snap), &self.tally.snapshots),
        };
        match result {
            Ok(()) => bump(counter),
            Err(e) => {
                warn!("{} world: {}", self.ctx.world, e);
                bump(&self.tally.write_errors);
            }
        }
    }

    fn report(&self, cancelled: bool, elapsed: Duration) -> RunReport {
        let t = &self.tally;
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        RunReport {
            world: self.ctx.world.clone(),
            mode: self.ctx.mode,
            total_pages: self.ctx.total_pages,
            pages_fetched: get(&t.pages_fetched),
            pages_failed: get(&t.pages_failed),
            pages_unparsed: get(&t.pages_unparsed),
            pages_extracted: get(&t.pages_extracted),
            entries: get(&t.entries),
            snapshots: get(&t.snapshots),
            rows_skipped: get(&t.rows_skipped),
            write_errors: get(&t.write_errors),
            cancelled,
            elapsed,
        }
    }
}

#[derive(Default)]
struct Tally {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    pages_unparsed: AtomicUsize,
    pages_extracted: AtomicUsize,
    entries: AtomicUsize,
    snapshots: AtomicUsize,
    rows_skipped: AtomicUsize,
    write_errors: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Pages not yet extracted, given up on, or dropped.
struct Outstanding {
    tx: watch::Sender<usize>,
}

impl Outstanding {
    fn new(pages: usize) -> Self {
        Self {
            tx: watch::Sender::new(pages),
        }
    }

    fn done(&self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn remaining(&self) -> usize {
        *self.tx.borrow()
    }

    async fn wait_zero(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

struct PageBody {
    page: u32,
    body: String,
}

async fn fetch_stage(job: Arc<Job>, first_page: String, tx: mpsc::Sender<PageBody>) {
    let world = job.ctx.world.as_str();
    let mut first_page = Some(first_page);

    for page in 1..=job.ctx.total_pages {
        let started = Instant::now();
        let body = match first_page.take() {
            Some(body) => body,
            None => {
                debug!("Downloading page {} of {} world started...", page, world);
                match fetch_with_retry(job.fetcher.as_ref(), world, page, &job.options, &job.cancel)
                    .await
                {
                    Ok(body) => body,
                    Err(ScrapeError::Cancelled) => return,
                    Err(e) => {
                        error!("{} world: giving up on page {}: {}", world, page, e);
                        bump(&job.tally.pages_failed);
                        job.page_done();
                        continue;
                    }
                }
            }
        };
        bump(&job.tally.pages_fetched);
        debug!(
            "Downloading page {} of {} world finished in {:.1}s",
            page,
            world,
            started.elapsed().as_secs_f64()
        );

        tokio::select! {
            _ = job.cancel.cancelled() => return,
            sent = tx.send(PageBody { page, body }) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn parse_stage(
    job: Arc<Job>,
    mut rx: mpsc::Receiver<PageBody>,
    tx: mpsc::Sender<LadderDocument>,
) {
    loop {
        let next = tokio::select! {
            _ = job.cancel.cancelled() => return,
            next = rx.recv() => next,
        };
        let Some(PageBody { page, body }) = next else {
            break;
        };

        match parse_ladder_page(page, &body) {
            Ok(doc) => {
                tokio::select! {
                    _ = job.cancel.cancelled() => return,
                    sent = tx.send(doc) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("{} world: {}", job.ctx.world, e);
                bump(&job.tally.pages_unparsed);
                job.page_done();
            }
        }
    }
}

async fn extract_stage(job: Arc<Job>, mut rx: mpsc::Receiver<LadderDocument>) {
    loop {
        let next = tokio::select! {
            _ = job.cancel.cancelled() => return,
            next = rx.recv() => next,
        };
        let Some(doc) = next else {
            break;
        };
        job.extract_document(&doc);
        job.page_done();
    }
}

async fn join_stages(stages: &mut JoinSet<()>) {
    while let Some(result) = stages.join_next().await {
        if let Err(e) = result {
            error!("ladder stage failed: {}", e);
        }
    }
}

/// One page with bounded retries, exponential backoff and a per-attempt
/// timeout.
async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    world: &str,
    page: u32,
    options: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<String, ScrapeError> {
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            outcome = tokio::time::timeout(options.fetch_timeout, fetcher.fetch_page(world, page)) => outcome,
        };
        let err = match outcome {
            Ok(Ok(body)) => return Ok(body),
            Ok(Err(e)) => e,
            Err(_) => ScrapeError::fetch(
                page,
                format!("timed out after {:.1}s", options.fetch_timeout.as_secs_f64()),
            ),
        };
        if attempt >= options.max_retries {
            return Err(err);
        }

        let backoff = options
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        attempt += 1;
        warn!(
            "{} world: {} (attempt {}/{}), retrying in {:.1}s",
            world,
            err,
            attempt,
            options.max_retries + 1,
            backoff.as_secs_f64()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

fn progress_bar(pages: u32, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(pages as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;
    use crate::db::SqliteStore;
    use crate::model::LadderEntry;

    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<u32, String>,
        /// Failures left before a page succeeds; `u32::MAX` means never.
        failures: Mutex<HashMap<u32, u32>>,
        hangs: HashSet<u32>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeFetcher {
        fn with_pages(pages: Vec<String>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .enumerate()
                    .map(|(i, body)| (i as u32 + 1, body))
                    .collect(),
                ..Default::default()
            }
        }

        fn failing(self, page: u32, times: u32) -> Self {
            self.failures.lock().unwrap().insert(page, times);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_page(&self, _world: &str, page: u32) -> Result<String, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.hangs.contains(&page) {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(&page) {
                    if *left > 0 {
                        if *left != u32::MAX {
                            *left -= 1;
                        }
                        return Err(ScrapeError::fetch(page, "HTTP 503"));
                    }
                }
            }
            self.pages
                .get(&page)
                .cloned()
                .ok_or_else(|| ScrapeError::fetch(page, "HTTP 404"))
        }
    }

    fn page_html(total: u32, rows: &[(&str, i64)]) -> String {
        let rows: String = rows
            .iter()
            .map(|(href, level)| {
                format!(
                    r#"<tr><td class="long-clan">nick{level}</td><td><a href="{href}">x</a></td>
                       <td class="long-level">{level}</td><td class="long-players">Mag</td>
                       <td class="long-ph">1 000</td><td class="long-last-online">teraz</td></tr>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><table><tbody>{rows}</tbody></table>
               <span class="total-pages">{total}</span></body></html>"#
        )
    }

    fn ladder(total: u32) -> Vec<String> {
        (1..=total as i64)
            .map(|p| {
                let first = format!("/profile/view,{p}#char_{}", p * 10);
                let second = format!("/profile/view,{p}#char_{}", p * 10 + 1);
                page_html(total, &[(first.as_str(), p), (second.as_str(), p)])
            })
            .collect()
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            fetch_timeout: Duration::from_secs(5),
            queue_capacity: 2,
            show_progress: false,
        }
    }

    fn pipeline(
        fetcher: &Arc<FakeFetcher>,
        store: &Arc<SqliteStore>,
        options: PipelineOptions,
    ) -> LadderPipeline {
        LadderPipeline::new(
            fetcher.clone(),
            store.clone(),
            options,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn malformed_link_drops_both_records() {
        let pages = vec![
            page_html(2, &[("/profile/view,42#char_7", 150)]),
            page_html(2, &[("/profile/view,x#char_8", 90)]),
        ];
        let fetcher = Arc::new(FakeFetcher::with_pages(pages));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        assert_eq!(report.total_pages, 2);
        assert_eq!(report.entries, 1);
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.rows_skipped, 1);
        let summary = store.summary().unwrap();
        assert_eq!(summary.ladder_entries, 1);
        assert_eq!(summary.level_snapshots, 1);
        let entry = store.find_ladder_entry("Telawel", 7).unwrap().unwrap();
        assert_eq!((entry.profile_id, entry.level, entry.honor), (42, 150, 1000));
    }

    #[tokio::test]
    async fn fixture_ladder_end_to_end() {
        let read = |n: u32| std::fs::read_to_string(format!("tests/fixtures/ladder_page{n}.html")).unwrap();
        let fetcher = Arc::new(FakeFetcher::with_pages(vec![read(1), read(2)]));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        assert_eq!((report.entries, report.snapshots, report.rows_skipped), (2, 2, 1));
        let berserk = store.find_ladder_entry("Telawel", 777).unwrap().unwrap();
        assert_eq!(berserk.nick, "Berserk");
        assert_eq!(berserk.last_online, "2 godziny temu");
        let aragorn = store.find_ladder_entry("Telawel", 9).unwrap().unwrap();
        assert_eq!(aragorn.honor, 9870);
    }

    #[tokio::test]
    async fn zero_failure_run_fetches_each_page_once() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(5)));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        assert_eq!(fetcher.calls(), 5);
        assert!(!report.cancelled);
        assert_eq!(report.pages_fetched, 5);
        assert_eq!(report.pages_extracted, 5);
        assert_eq!(report.entries, 10);
        assert_eq!(store.summary().unwrap().ladder_entries, 10);
    }

    #[tokio::test]
    async fn records_share_run_timestamp() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Duration::from_millis(5),
            ..FakeFetcher::with_pages(ladder(3))
        });
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        let first = store.find_ladder_entry("Telawel", 10).unwrap().unwrap();
        let last = store.find_ladder_entry("Telawel", 31).unwrap().unwrap();
        assert_eq!(first.captured_at, last.captured_at);
    }

    #[tokio::test]
    async fn second_run_upserts_in_place() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(2)));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline(&fetcher, &store, options());

        pipeline.run("Telawel", ScrapMode::Full).await;
        pipeline.run("Telawel", ScrapMode::Full).await;

        let summary = store.summary().unwrap();
        assert_eq!(summary.ladder_entries, 4);
        assert_eq!(summary.level_snapshots, 8);
        assert_eq!(store.level_history("Telawel", 20).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(4)).failing(3, 2));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        assert_eq!(fetcher.calls(), 6);
        assert_eq!(report.pages_failed, 0);
        assert_eq!(report.pages_extracted, 4);
    }

    #[tokio::test]
    async fn exhausted_retries_drop_the_page() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(3)).failing(2, u32::MAX));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let opts = PipelineOptions {
            max_retries: 2,
            ..options()
        };

        let report = pipeline(&fetcher, &store, opts).run("Telawel", ScrapMode::Full).await;

        // pages 1 and 3 once, page 2 three times
        assert_eq!(fetcher.calls(), 5);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.pages_extracted, 2);
        assert!(!report.cancelled);
        assert!(store.find_ladder_entry("Telawel", 20).unwrap().is_none());
        assert!(store.find_ladder_entry("Telawel", 30).unwrap().is_some());
    }

    #[tokio::test]
    async fn unparsable_page_is_not_refetched() {
        let mut pages = ladder(3);
        pages[1] = "<html><body>Przerwa techniczna</body></html>".into();
        let fetcher = Arc::new(FakeFetcher::with_pages(pages));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Full).await;

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(report.pages_unparsed, 1);
        assert_eq!(report.pages_extracted, 2);
    }

    #[tokio::test]
    async fn failed_discovery_yields_empty_run() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(3)).failing(1, u32::MAX));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let opts = PipelineOptions {
            max_retries: 1,
            ..options()
        };

        let report = pipeline(&fetcher, &store, opts).run("Telawel", ScrapMode::Full).await;

        assert_eq!(report.total_pages, 0);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(store.summary().unwrap().ladder_entries, 0);
    }

    #[tokio::test]
    async fn missing_page_count_means_single_page() {
        let body = r#"<table><tbody><tr><td><a href="/profile/view,1#char_2">a</a></td></tr></tbody></table>"#;
        let fetcher = Arc::new(FakeFetcher::with_pages(vec![body.into(), body.into()]));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Telawel", ScrapMode::Level).await;

        assert_eq!(report.total_pages, 1);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(report.snapshots, 1);
    }

    #[tokio::test]
    async fn level_mode_stores_snapshots_only() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(2)));
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let report = pipeline(&fetcher, &store, options()).run("Nerthus", ScrapMode::Level).await;

        assert_eq!((report.entries, report.snapshots), (0, 4));
        let summary = store.summary().unwrap();
        assert_eq!((summary.ladder_entries, summary.level_snapshots), (0, 4));
    }

    #[tokio::test]
    async fn same_world_runs_do_not_overlap() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Duration::from_millis(10),
            ..FakeFetcher::with_pages(ladder(3))
        });
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline(&fetcher, &store, options());

        let (a, b) = tokio::join!(
            pipeline.run("Telawel", ScrapMode::Full),
            pipeline.run("Telawel", ScrapMode::Full)
        );

        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls(), 6);
        assert_eq!((a.pages_extracted, b.pages_extracted), (3, 3));
    }

    #[tokio::test]
    async fn timed_out_fetch_counts_as_failure() {
        let fetcher = Arc::new(FakeFetcher {
            hangs: HashSet::from([2]),
            ..FakeFetcher::with_pages(ladder(3))
        });
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let opts = PipelineOptions {
            max_retries: 1,
            fetch_timeout: Duration::from_millis(20),
            ..options()
        };

        let report = pipeline(&fetcher, &store, opts).run("Telawel", ScrapMode::Full).await;

        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.pages_extracted, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_a_stuck_run() {
        let fetcher = Arc::new(FakeFetcher {
            hangs: HashSet::from([2]),
            ..FakeFetcher::with_pages(ladder(3))
        });
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cancel = CancellationToken::new();
        let pipeline = LadderPipeline::new(
            fetcher.clone(),
            store.clone(),
            PipelineOptions {
                fetch_timeout: Duration::from_secs(3600),
                ..options()
            },
            cancel.clone(),
        );

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (report, ()) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(pipeline.run("Telawel", ScrapMode::Full), stopper) },
        )
        .await
        .expect("run should stop once cancelled");

        assert!(report.cancelled);
        assert!(report.pages_extracted <= 1);
    }

    struct RejectingStore;

    impl RecordStore for RejectingStore {
        fn upsert_ladder_entry(&self, _: &LadderEntry) -> Result<(), ScrapeError> {
            Err(ScrapeError::Persistence(rusqlite::Error::InvalidQuery))
        }

        fn insert_level_snapshot(&self, _: &crate::model::LevelSnapshot) -> Result<(), ScrapeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_run() {
        let fetcher = Arc::new(FakeFetcher::with_pages(ladder(2)));
        let pipeline = LadderPipeline::new(
            fetcher.clone(),
            Arc::new(RejectingStore),
            options(),
            CancellationToken::new(),
        );

        let report = pipeline.run("Telawel", ScrapMode::Full).await;

        assert_eq!(report.write_errors, 4);
        assert_eq!(report.snapshots, 4);
        assert_eq!(report.pages_extracted, 2);
    }
}
