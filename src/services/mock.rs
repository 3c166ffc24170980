//! In-memory fetcher for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{ListingEntry, ListingPage, Record};
use crate::services::{FetchResult, RecordFetcher};

/// Serves canned pages and records and logs every request.
///
/// Unknown URLs answer [`FetchError::NotFound`]. Queued failures are
/// returned before the canned answer, one per request.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, ListingPage>,
    records: HashMap<String, Record>,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    delays: HashMap<String, Duration>,
    listing_requests: Mutex<Vec<String>>,
    detail_requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, entries: Vec<ListingEntry>, next: Option<&str>) -> Self {
        self.pages.insert(
            url.to_string(),
            ListingPage {
                entries,
                next_page_url: next.map(str::to_string),
            },
        );
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.insert(record.identity.clone(), record);
        self
    }

    pub fn with_failure(self, url: &str, error: FetchError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn listing_requests(&self) -> Vec<String> {
        self.listing_requests.lock().unwrap().clone()
    }

    pub fn detail_requests(&self) -> Vec<String> {
        self.detail_requests.lock().unwrap().clone()
    }

    async fn answer(&self, url: &str) -> FetchResult<()> {
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        let queued = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordFetcher for MockFetcher {
    async fn fetch_listing_page(&self, url: &str) -> FetchResult<ListingPage> {
        self.listing_requests.lock().unwrap().push(url.to_string());
        self.answer(url).await?;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::not_found(url))
    }

    async fn fetch_detail_record(&self, url: &str) -> FetchResult<Record> {
        self.detail_requests.lock().unwrap().push(url.to_string());
        self.answer(url).await?;
        self.records
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::not_found(url))
    }
}
