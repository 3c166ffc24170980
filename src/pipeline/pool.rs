//! Bounded, order-preserving detail fetch pool.

use futures::stream::{self, BoxStream, StreamExt};

use crate::models::Record;
use crate::services::{FetchResult, RecordFetcher};

/// Runs detail fetches with at most `width` in flight.
///
/// Results come back in the order the URLs were given, whatever order the
/// fetches finish in. Once degraded, the pool fetches one URL at a time for
/// the rest of its life.
#[derive(Debug, Clone)]
pub struct FetchPool {
    max_concurrent: usize,
    degraded: bool,
}

impl FetchPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            degraded: false,
        }
    }

    pub fn width(&self) -> usize {
        if self.degraded { 1 } else { self.max_concurrent }
    }

    pub fn degrade(&mut self) {
        self.degraded = true;
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Stream `(url, result)` pairs in input order.
    ///
    /// Dropping the stream abandons fetches still in flight.
    pub fn fetch_records<'f>(
        &self,
        fetcher: &'f dyn RecordFetcher,
        urls: Vec<String>,
    ) -> BoxStream<'f, (String, FetchResult<Record>)> {
        stream::iter(urls)
            .map(move |url| async move {
                let result = fetcher.fetch_detail_record(&url).await;
                (url, result)
            })
            .buffered(self.width())
            .boxed()
    }
}
