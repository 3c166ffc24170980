// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod record;
mod selectors;

// Re-export all public types
pub use config::{Config, CrawlerConfig, DateConfig, ResourceConfig, StorageConfig, UpdateConfig};
pub use listing::{ListingEntry, ListingPage};
pub use record::{Record, RecordSummary, same_status};
pub use selectors::{FieldSelector, PageSelectors};
