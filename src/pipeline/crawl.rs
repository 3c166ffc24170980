// src/pipeline/crawl.rs

//! Incremental crawl of the report listing.
//!
//! Listing pages are walked from newest to oldest. The detail links of each
//! page are planned in link order first (known identities and the record cap
//! are decided before anything is fetched), then fetched on the bounded pool
//! and handed to the buffered writer in link order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::StreamExt;

use crate::error::Result;
use crate::models::{Config, ListingPage};
use crate::pipeline::FetchPool;
use crate::services::RecordFetcher;
use crate::storage::{BufferedWriter, ResourceMonitor, ShardStore};
use crate::utils::log::{header, summary};

/// What to do with links whose identity is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Stop the crawl at the first known identity.
    StopOnExisting,
    /// Skip known identities and keep going.
    ScanThrough,
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub mode: CrawlMode,
    pub max_records: Option<usize>,
    /// Stop after storing a record reported on or before this date
    pub until_date: Option<NaiveDate>,
    pub max_pages: usize,
    pub max_concurrent: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            mode: CrawlMode::StopOnExisting,
            max_records: None,
            until_date: None,
            max_pages: usize::MAX,
            max_concurrent: 1,
        }
    }
}

/// Why a crawl ended. Every variant is a normal termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CapReached,
    KnownIdentity,
    UntilDate,
    NoMorePages,
    PageLimit,
    ListingFailed,
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CapReached => "record cap reached",
            Self::KnownIdentity => "reached an already stored report",
            Self::UntilDate => "reached the until date",
            Self::NoMorePages => "no more listing pages",
            Self::PageLimit => "listing page limit reached",
            Self::ListingFailed => "listing page could not be fetched",
            Self::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

/// Counters of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages: usize,
    pub links_seen: usize,
    pub fetched: usize,
    pub stored: usize,
    /// Links whose detail fetch failed
    pub skipped: usize,
    /// Links passed over because the identity was already stored
    pub known_skipped: usize,
    pub stop_reason: StopReason,
    pub degraded: bool,
}

impl Default for CrawlReport {
    fn default() -> Self {
        Self {
            pages: 0,
            links_seen: 0,
            fetched: 0,
            stored: 0,
            skipped: 0,
            known_skipped: 0,
            stop_reason: StopReason::NoMorePages,
            degraded: false,
        }
    }
}

impl CrawlReport {
    pub fn log_summary(&self) {
        summary(
            "Crawl finished",
            &[
                ("Stop reason", self.stop_reason.to_string()),
                ("Listing pages", self.pages.to_string()),
                ("Links seen", self.links_seen.to_string()),
                ("Fetched", self.fetched.to_string()),
                ("Stored", self.stored.to_string()),
                ("Skipped (fetch failed)", self.skipped.to_string()),
                ("Skipped (already stored)", self.known_skipped.to_string()),
                ("Sequential fallback", self.degraded.to_string()),
            ],
        );
    }
}

/// Candidate links of one page, decided in link order.
struct Plan {
    candidates: Vec<String>,
    /// Where planning stopped and why
    halt: Option<(StopReason, usize)>,
}

enum Round {
    Completed,
    Stopped(StopReason),
    /// A transient failure switched the pool to sequential; these links are
    /// still to be fetched.
    Degraded(Vec<String>),
}

/// Drives one crawl run over a fetcher and a buffered writer.
pub struct CrawlController<'a> {
    fetcher: &'a dyn RecordFetcher,
    writer: &'a mut BufferedWriter,
    options: CrawlOptions,
    pool: FetchPool,
    report: CrawlReport,
}

impl<'a> CrawlController<'a> {
    pub fn new(
        fetcher: &'a dyn RecordFetcher,
        writer: &'a mut BufferedWriter,
        options: CrawlOptions,
    ) -> Self {
        let pool = FetchPool::new(options.max_concurrent);
        Self {
            fetcher,
            writer,
            options,
            pool,
            report: CrawlReport::default(),
        }
    }

    /// Crawl from `start_url` until a stop condition, then flush.
    ///
    /// The writer is flushed whether the crawl succeeded or not; the crawl
    /// error takes precedence over a flush error.
    pub async fn run(mut self, start_url: String) -> Result<CrawlReport> {
        let outcome = self.crawl(start_url).await;
        let flushed = self.writer.flush();

        self.report.stop_reason = outcome?;
        flushed?;
        self.report.degraded = self.pool.is_degraded();
        Ok(self.report)
    }

    async fn crawl(&mut self, start_url: String) -> Result<StopReason> {
        let mut next = Some(start_url);

        while let Some(url) = next.take() {
            if self.report.pages >= self.options.max_pages {
                return Ok(StopReason::PageLimit);
            }
            if self.cap_reached() {
                return Ok(StopReason::CapReached);
            }

            let page = match self.fetcher.fetch_listing_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    log::error!("Listing page {} failed: {}", url, e);
                    return Ok(StopReason::ListingFailed);
                }
            };
            self.report.pages += 1;
            self.report.links_seen += page.entries.len();
            log::info!("Page {}: {} links ({})", self.report.pages, page.entries.len(), url);

            if let Some(reason) = self.process_page(&page).await? {
                return Ok(reason);
            }
            next = page.next_page_url;
        }

        Ok(StopReason::NoMorePages)
    }

    /// Returns a stop reason if the crawl must end on this page.
    async fn process_page(&mut self, page: &ListingPage) -> Result<Option<StopReason>> {
        let links: Vec<&str> = page.links().collect();
        let mut cursor = 0;

        loop {
            let plan = self.plan(&links, cursor);

            let mut pending = plan.candidates;
            while !pending.is_empty() {
                match self.fetch_and_store(pending).await? {
                    Round::Completed => break,
                    Round::Stopped(reason) => return Ok(Some(reason)),
                    Round::Degraded(rest) => pending = rest,
                }
            }

            match plan.halt {
                None => return Ok(None),
                Some((StopReason::CapReached, at)) if !self.cap_reached() => {
                    // Failed fetches left room under the cap.
                    cursor = at;
                }
                Some((reason, _)) => return Ok(Some(reason)),
            }
        }
    }

    fn plan(&mut self, links: &[&str], start: usize) -> Plan {
        let mut candidates = Vec::new();
        let mut planned = HashSet::new();

        for (i, &link) in links.iter().enumerate().skip(start) {
            let room_left = self
                .options
                .max_records
                .is_none_or(|cap| self.report.fetched + candidates.len() < cap);
            if !room_left {
                return Plan {
                    candidates,
                    halt: Some((StopReason::CapReached, i)),
                };
            }

            if self.writer.index().contains(link) {
                match self.options.mode {
                    CrawlMode::StopOnExisting => {
                        log::info!("Reached already stored report {}", link);
                        return Plan {
                            candidates,
                            halt: Some((StopReason::KnownIdentity, i)),
                        };
                    }
                    CrawlMode::ScanThrough => {
                        self.report.known_skipped += 1;
                        continue;
                    }
                }
            }

            if planned.insert(link) {
                candidates.push(link.to_string());
            }
        }

        Plan {
            candidates,
            halt: None,
        }
    }

    async fn fetch_and_store(&mut self, urls: Vec<String>) -> Result<Round> {
        let fetcher = self.fetcher;
        let mut results = self.pool.fetch_records(fetcher, urls.clone());
        let mut applied = 0;

        while let Some((url, result)) = results.next().await {
            applied += 1;
            match result {
                Ok(record) => {
                    self.report.fetched += 1;
                    let report_date = record.report_date;
                    if self.writer.insert(record)? {
                        self.report.stored += 1;
                    } else {
                        self.report.known_skipped += 1;
                    }

                    if self.options.until_date.is_some_and(|until| report_date <= until) {
                        log::info!("Reached until date with {} ({})", url, report_date);
                        return Ok(Round::Stopped(StopReason::UntilDate));
                    }
                }
                Err(e) => {
                    self.report.skipped += 1;
                    log::warn!("Skipping {}: {}", url, e);

                    if e.is_transient() && !self.pool.is_degraded() {
                        self.pool.degrade();
                        log::warn!("Transient failure, switching to sequential fetching");
                        return Ok(Round::Degraded(urls[applied..].to_vec()));
                    }
                }
            }
        }
        Ok(Round::Completed)
    }

    fn cap_reached(&self) -> bool {
        self.options
            .max_records
            .is_some_and(|cap| self.report.fetched >= cap)
    }
}

/// Parameters of a crawl run taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct CrawlRequest {
    pub start_page: Option<usize>,
    pub until_date: Option<NaiveDate>,
    /// Resume from the estimated page and skip known reports instead of
    /// stopping at the first one
    pub continue_from_resume: bool,
    pub max_records: Option<usize>,
}

/// Run a crawl against the store configured in `config`.
pub async fn run_crawler(
    config: &Config,
    fetcher: &dyn RecordFetcher,
    request: CrawlRequest,
) -> Result<CrawlReport> {
    header("Crawling reports");

    let store = Arc::new(ShardStore::open(&config.storage.data_dir)?);
    let index = Arc::new(store.load_identity_index()?);
    log::info!(
        "Loaded {} stored identities from {}",
        index.len(),
        store.root_dir().display()
    );

    let start_page = match request.start_page {
        Some(page) => page.max(1),
        None if request.continue_from_resume => {
            let point = store.compute_resume_point()?;
            let page = point.estimate_start_page(config.crawler.page_size);
            log::info!(
                "Resuming at page {} ({} stored, oldest {})",
                page,
                point.total_count,
                point.oldest_date.map_or("-".to_string(), |d| d.to_string())
            );
            page
        }
        None => 1,
    };

    let mode = if request.continue_from_resume {
        CrawlMode::ScanThrough
    } else {
        CrawlMode::StopOnExisting
    };
    let options = CrawlOptions {
        mode,
        max_records: request.max_records,
        until_date: request.until_date,
        max_pages: config.crawler.max_pages,
        max_concurrent: config.crawler.max_concurrent,
    };

    let monitor = ResourceMonitor::new(&config.resources, &config.storage.data_dir);
    let mut writer =
        BufferedWriter::new(store, index, config.storage.buffer_size).with_monitor(monitor);

    let report = CrawlController::new(fetcher, &mut writer, options)
        .run(config.crawler.page_url(start_page))
        .await?;
    writer.finish()?;

    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{ListingEntry, Record};
    use crate::services::mock::MockFetcher;
    use crate::storage::IdentityIndex;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn url(id: &str) -> String {
        format!("https://example.com/r/{id}")
    }

    fn page_url(n: usize) -> String {
        format!("https://example.com/list?page={n}")
    }

    fn entries(ids: &[&str]) -> Vec<ListingEntry> {
        ids.iter().map(|id| ListingEntry::new(url(id))).collect()
    }

    /// Three pages of three links each, dated from 2025-09-30 downwards.
    fn three_pages() -> MockFetcher {
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
        let mut fetcher = MockFetcher::new()
            .with_page(&page_url(1), entries(&ids[0..3]), Some(&page_url(2)))
            .with_page(&page_url(2), entries(&ids[3..6]), Some(&page_url(3)))
            .with_page(&page_url(3), entries(&ids[6..9]), None);
        for (i, id) in ids.iter().enumerate() {
            let day = date("2025-09-30") - chrono::Days::new(i as u64 * 3);
            fetcher = fetcher.with_record(Record::new(url(id), day).with_status("VÁRAKOZÁS"));
        }
        fetcher
    }

    struct Harness {
        _tmp: TempDir,
        store: Arc<ShardStore>,
        writer: BufferedWriter,
    }

    fn harness(known: &[&str]) -> Harness {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ShardStore::open(tmp.path()).unwrap());
        let index = Arc::new(IdentityIndex::new());
        for id in known {
            store
                .merge_insert(&Record::new(url(id), date("2025-09-10")), &index)
                .unwrap();
        }
        let writer = BufferedWriter::new(store.clone(), index, 50);
        Harness {
            _tmp: tmp,
            store,
            writer,
        }
    }

    fn options(mode: CrawlMode) -> CrawlOptions {
        CrawlOptions {
            mode,
            max_concurrent: 3,
            ..CrawlOptions::default()
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_known_identity() {
        let fetcher = three_pages();
        let mut h = harness(&["f"]);

        let report = CrawlController::new(&fetcher, &mut h.writer, options(CrawlMode::StopOnExisting))
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::KnownIdentity);
        assert_eq!(report.stored, 5);
        assert_eq!(fetcher.listing_requests(), vec![page_url(1), page_url(2)]);
        let page_two: Vec<String> = fetcher
            .detail_requests()
            .into_iter()
            .filter(|u| [url("d"), url("e"), url("f")].contains(u))
            .collect();
        assert_eq!(page_two.len(), 2);
        assert!(!page_two.contains(&url("f")));
        assert_eq!(h.store.compute_resume_point().unwrap().total_count, 6);
    }

    #[tokio::test]
    async fn test_record_cap() {
        let fetcher = three_pages();
        let mut h = harness(&[]);
        let opts = CrawlOptions {
            max_records: Some(4),
            ..options(CrawlMode::StopOnExisting)
        };

        let report = CrawlController::new(&fetcher, &mut h.writer, opts)
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::CapReached);
        assert_eq!(report.fetched, 4);
        assert_eq!(fetcher.detail_requests().len(), 4);
        assert_eq!(fetcher.listing_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cap_replans_after_failures() {
        let fetcher = three_pages().with_failure(&url("b"), FetchError::not_found(url("b")));
        let mut h = harness(&[]);
        let opts = CrawlOptions {
            max_records: Some(2),
            ..options(CrawlMode::StopOnExisting)
        };

        let report = CrawlController::new(&fetcher, &mut h.writer, opts)
            .run(page_url(1))
            .await
            .unwrap();

        // a and b are planned first; b fails so c gets the remaining slot.
        assert_eq!(report.stop_reason, StopReason::CapReached);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped, 1);
        assert!(fetcher.detail_requests().contains(&url("c")));
        assert_eq!(fetcher.listing_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_until_date_stops_after_storing() {
        let fetcher = three_pages();
        let mut h = harness(&[]);
        // e is dated 2025-09-18
        let opts = CrawlOptions {
            until_date: Some(date("2025-09-18")),
            ..options(CrawlMode::StopOnExisting)
        };

        let report = CrawlController::new(&fetcher, &mut h.writer, opts)
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::UntilDate);
        assert_eq!(report.stored, 5);
        let summaries = h.store.load_summaries().unwrap();
        assert!(summaries.contains_key(&url("e")));
        assert!(!summaries.contains_key(&url("f")));
        assert_eq!(fetcher.listing_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_through_skips_known() {
        let fetcher = three_pages();
        let mut h = harness(&["b", "f"]);

        let report = CrawlController::new(&fetcher, &mut h.writer, options(CrawlMode::ScanThrough))
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::NoMorePages);
        assert_eq!(report.pages, 3);
        assert_eq!(report.stored, 7);
        assert_eq!(report.known_skipped, 2);
        assert!(!fetcher.detail_requests().contains(&url("b")));
        assert_eq!(h.store.compute_resume_point().unwrap().total_count, 9);
    }

    #[tokio::test]
    async fn test_transient_failure_degrades_to_sequential() {
        let fetcher = three_pages().with_failure(&url("a"), FetchError::transient(url("a"), "reset"));
        let mut h = harness(&[]);

        let report = CrawlController::new(&fetcher, &mut h.writer, options(CrawlMode::StopOnExisting))
            .run(page_url(1))
            .await
            .unwrap();

        assert!(report.degraded);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.stored, 8);
        assert_eq!(report.stop_reason, StopReason::NoMorePages);
    }

    #[tokio::test]
    async fn test_listing_failure_ends_crawl() {
        let fetcher = three_pages().with_failure(&page_url(2), FetchError::transient(page_url(2), "503"));
        let mut h = harness(&[]);

        let report = CrawlController::new(&fetcher, &mut h.writer, options(CrawlMode::StopOnExisting))
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::ListingFailed);
        assert_eq!(report.stored, 3);
        assert_eq!(h.store.compute_resume_point().unwrap().total_count, 3);
    }

    #[tokio::test]
    async fn test_page_limit() {
        let fetcher = three_pages();
        let mut h = harness(&[]);
        let opts = CrawlOptions {
            max_pages: 1,
            ..options(CrawlMode::StopOnExisting)
        };

        let report = CrawlController::new(&fetcher, &mut h.writer, opts)
            .run(page_url(1))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::PageLimit);
        assert_eq!(report.pages, 1);
    }

    #[tokio::test]
    async fn test_run_crawler_resumes_from_estimate() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = tmp.path().to_path_buf();
        config.crawler.listing_url = "https://example.com/list".to_string();
        config.crawler.page_size = 3;
        config.crawler.request_delay_ms = 0;
        config.resources.disk_floor_mb = 0;
        config.resources.memory_ceiling_mb = 1_000_000;

        {
            let store = ShardStore::open(tmp.path()).unwrap();
            let index = IdentityIndex::new();
            for id in ["a", "b", "c", "d", "e", "f"] {
                store
                    .merge_insert(&Record::new(url(id), date("2025-09-01")), &index)
                    .unwrap();
            }
        }

        let fetcher = three_pages();
        let request = CrawlRequest {
            continue_from_resume: true,
            ..CrawlRequest::default()
        };
        let report = run_crawler(&config, &fetcher, request).await.unwrap();

        assert_eq!(fetcher.listing_requests()[0], page_url(2));
        assert_eq!(report.stored, 3);
        assert_eq!(report.stop_reason, StopReason::NoMorePages);
    }
}
