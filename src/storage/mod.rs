//! Chronological record storage.
//!
//! Records live in one JSONL file per calendar month of their report date,
//! newest first within each file:
//!
//! ```text
//! data/raw/
//! ├── 2025-08.jsonl
//! ├── 2025-09.jsonl
//! └── 2025-10.jsonl
//! ```
//!
//! Every insert rewrites the whole shard (O(shard size) per write). The
//! [`BufferedWriter`] batches inserts per shard so a crawl pays that cost
//! once per flush instead of once per record.

pub mod buffer;
pub mod index;
pub mod local;
pub mod resources;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::{AppError, Result};

// Re-export for convenience
pub use buffer::{BufferedWriter, WriterStats};
pub use index::IdentityIndex;
pub use local::ShardStore;
pub use resources::{ResourceMonitor, ResourcePressure, ResourceProbe, SystemProbe};

/// Calendar month naming one shard file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey {
    year: i32,
    month: u32,
}

impl ShardKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        ((1..=12).contains(&month) && (0..=9999).contains(&year)).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// File name of the shard, e.g. `2025-09.jsonl`.
    pub fn file_name(&self) -> String {
        format!("{self}.jsonl")
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ShardKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AppError::validation(format!("invalid shard key '{s}', expected YYYY-MM"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// Shard holding records reported on `date`.
pub fn resolve_shard_key(date: NaiveDate) -> ShardKey {
    ShardKey {
        year: date.year(),
        month: date.month(),
    }
}

/// Where a resumed crawl should continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumePoint {
    /// Oldest report date in the store
    pub oldest_date: Option<NaiveDate>,
    /// Number of stored records
    pub total_count: usize,
}

impl ResumePoint {
    /// Approximate listing page to resume from.
    ///
    /// `total_count / page_size` full pages are already stored, so the first
    /// page with unseen records is one past that; resuming one page earlier
    /// absorbs reports published since the last run. As a 0-based page
    /// index that is `total_count / page_size - 1`; listing pages are
    /// numbered from 1, so the value returned is `total_count / page_size`,
    /// never below 1. This is a heuristic: a change of page size or sort
    /// order on the source invalidates it.
    pub fn estimate_start_page(&self, page_size: usize) -> usize {
        (self.total_count / page_size.max(1)).max(1)
    }
}
