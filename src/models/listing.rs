//! Listing page data returned by a fetcher.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One card on a listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingEntry {
    /// Absolute detail page URL (the record identity)
    pub url: String,

    /// Status badge shown on the card, if any
    #[serde(default)]
    pub status: Option<String>,

    /// Report date shown on the card, if the listing exposes one
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl ListingEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: None,
            date: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// A parsed listing page, entries in page order (newest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    pub next_page_url: Option<String>,
}

impl ListingPage {
    pub fn links(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.url.as_str())
    }
}
