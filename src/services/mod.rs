//! Service layer for the harvester.
//!
//! This module contains:
//! - The fetcher seam (`RecordFetcher`) and retry helper
//! - The live site fetcher (`HttpFetcher`)
//! - Date parsing for page dates (`DateParser`)

mod dates;
mod fetcher;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use dates::DateParser;
pub use fetcher::{FetchResult, RecordFetcher, with_retry};
pub use http::HttpFetcher;
