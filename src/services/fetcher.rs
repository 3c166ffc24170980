//! The fetcher seam between the crawl logic and the network.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{ListingPage, Record};

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Source of listing pages and detail records.
///
/// Implementations classify every failure as a [`FetchError`]; callers decide
/// whether to skip, degrade or abort based on that class alone.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// Fetch one listing page, entries in page order.
    async fn fetch_listing_page(&self, url: &str) -> FetchResult<ListingPage>;

    /// Fetch and parse the detail page of a single report.
    async fn fetch_detail_record(&self, url: &str) -> FetchResult<Record>;
}

/// Run `op`, retrying transient failures up to `max_retries` times.
///
/// The wait before retry `n` is `backoff * n`. Non-transient errors are
/// returned immediately.
pub async fn with_retry<T, F, Fut>(max_retries: u32, backoff: Duration, mut op: F) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                log::debug!("Retry {}/{} after: {}", attempt, max_retries, e);
                tokio::time::sleep(backoff * attempt).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(3, Duration::ZERO, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FetchError::transient("u", "reset"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FetchResult<()> = with_retry(2, Duration::ZERO, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::transient("u", "timeout"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FetchResult<()> = with_retry(5, Duration::ZERO, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::not_found("u"))
        })
        .await;

        assert_eq!(result, Err(FetchError::not_found("u")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
