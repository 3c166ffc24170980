//! Pipeline entry points for harvester operations.
//!
//! - `run_crawler`: Fetch new reports from the listing into the store
//! - `run_detect_changes` / `run_old_pending`: Pick reports for a status refresh
//! - `run_rescan` / `run_update`: Refresh stored reports in place

pub mod crawl;
pub mod pool;
pub mod update;

pub use crawl::{
    CrawlController, CrawlMode, CrawlOptions, CrawlReport, CrawlRequest, StopReason, run_crawler,
};
pub use pool::FetchPool;
pub use update::{
    RescanReport, UpdateScheduler, resolve_cutoff, run_detect_changes, run_old_pending,
    run_rescan, run_update,
};
