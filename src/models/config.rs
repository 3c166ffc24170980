//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::PageSelectors;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Shard directory and write buffering
    #[serde(default)]
    pub storage: StorageConfig,

    /// Memory and disk thresholds that force a flush
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Status re-check settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// Page scraping selectors
    #[serde(default)]
    pub selectors: PageSelectors,

    /// Date parsing rules
    #[serde(default)]
    pub dates: DateConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.page_size == 0 {
            return Err(AppError::validation("crawler.page_size must be > 0"));
        }
        url::Url::parse(&self.crawler.listing_url)
            .map_err(|e| AppError::validation(format!("crawler.listing_url: {e}")))?;
        if self.storage.buffer_size == 0 {
            return Err(AppError::validation("storage.buffer_size must be > 0"));
        }
        if self.resources.check_interval_secs == 0 {
            return Err(AppError::validation(
                "resources.check_interval_secs must be > 0",
            ));
        }
        if self.update.resolved_statuses.is_empty() {
            return Err(AppError::validation("update.resolved_statuses is empty"));
        }
        regex::Regex::new(&self.selectors.resolution_pattern)
            .map_err(|e| AppError::validation(format!("selectors.resolution_pattern: {e}")))?;
        if self.dates.month_names.values().any(|m| !(1..=12).contains(m)) {
            return Err(AppError::validation("dates.month_names must map to 1..=12"));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between listing page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent detail page requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Retries for a transient fetch failure before the link is skipped
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Backoff step between retries in milliseconds (multiplied by attempt)
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// First listing page (newest reports)
    #[serde(default = "defaults::listing_url")]
    pub listing_url: String,

    /// Query parameter carrying the page number
    #[serde(default = "defaults::page_param")]
    pub page_param: String,

    /// Reports per listing page, used to estimate the resume page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Safety limit on listing pages walked in one run
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,
}

impl CrawlerConfig {
    /// URL of the given 1-based listing page.
    pub fn page_url(&self, page: usize) -> String {
        if page <= 1 {
            return self.listing_url.clone();
        }
        match url::Url::parse(&self.listing_url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair(&self.page_param, &page.to_string());
                url.to_string()
            }
            Err(_) => format!("{}?{}={}", self.listing_url, self.page_param, page),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            max_retries: defaults::max_retries(),
            retry_backoff_ms: defaults::retry_backoff(),
            listing_url: defaults::listing_url(),
            page_param: defaults::page_param(),
            page_size: defaults::page_size(),
            max_pages: defaults::max_pages(),
        }
    }
}

/// Shard storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the `YYYY-MM.jsonl` shards
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Records buffered in memory before a flush
    #[serde(default = "defaults::buffer_size")]
    pub buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            buffer_size: defaults::buffer_size(),
        }
    }
}

/// Resource thresholds consumed by the buffered writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Process resident memory above which the buffer is flushed
    #[serde(default = "defaults::memory_ceiling")]
    pub memory_ceiling_mb: u64,

    /// Free disk space below which the buffer is flushed
    #[serde(default = "defaults::disk_floor")]
    pub disk_floor_mb: u64,

    /// Minimum wall-clock time between two resource checks
    #[serde(default = "defaults::check_interval")]
    pub check_interval_secs: u64,
}

impl ResourceConfig {
    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_mb.saturating_mul(1024 * 1024)
    }

    pub fn disk_floor_bytes(&self) -> u64 {
        self.disk_floor_mb.saturating_mul(1024 * 1024)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_mb: defaults::memory_ceiling(),
            disk_floor_mb: defaults::disk_floor(),
            check_interval_secs: defaults::check_interval(),
        }
    }
}

/// Differential status update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Reports newer than this many months are re-checked from listing pages
    #[serde(default = "defaults::cutoff_months")]
    pub cutoff_months: u32,

    /// Status labels meaning the report was resolved
    #[serde(default = "defaults::resolved_statuses")]
    pub resolved_statuses: Vec<String>,

    /// Status labels that will never change again
    #[serde(default = "defaults::terminal_statuses")]
    pub terminal_statuses: Vec<String>,

    /// File name (inside the data directory) of URLs awaiting a resolution date
    #[serde(default = "defaults::retry_file")]
    pub retry_file: String,
}

impl UpdateConfig {
    pub fn is_resolved(&self, status: Option<&str>) -> bool {
        status.is_some_and(|s| Self::contains(&self.resolved_statuses, s))
    }

    /// A missing status is never terminal.
    pub fn is_terminal(&self, status: Option<&str>) -> bool {
        status.is_some_and(|s| Self::contains(&self.terminal_statuses, s))
    }

    /// Cutoff date `cutoff_months * 30` days before `today`.
    pub fn cutoff_from(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(u64::from(self.cutoff_months) * 30))
            .unwrap_or(NaiveDate::MIN)
    }

    fn contains(list: &[String], status: &str) -> bool {
        let status = status.trim().to_uppercase();
        list.iter().any(|s| s.trim().to_uppercase() == status)
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            cutoff_months: defaults::cutoff_months(),
            resolved_statuses: defaults::resolved_statuses(),
            terminal_statuses: defaults::terminal_statuses(),
            retry_file: defaults::retry_file(),
        }
    }
}

/// Date parsing rules for dates printed on the source pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateConfig {
    /// Month names (lowercase) to month numbers
    #[serde(default = "defaults::month_names")]
    pub month_names: BTreeMap<String, u32>,

    /// chrono formats tried before the month-name form
    #[serde(default = "defaults::date_formats")]
    pub formats: Vec<String>,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            month_names: defaults::month_names(),
            formats: defaults::date_formats(),
        }
    }
}

mod defaults {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        100
    }
    pub fn max_concurrent() -> usize {
        5
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_backoff() -> u64 {
        500
    }
    pub fn listing_url() -> String {
        "https://jarokelo.hu/bejelentesek".into()
    }
    pub fn page_param() -> String {
        "page".into()
    }
    pub fn page_size() -> usize {
        8
    }
    pub fn max_pages() -> usize {
        2000
    }

    // Storage defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data/raw")
    }
    pub fn buffer_size() -> usize {
        50
    }

    // Resource defaults
    pub fn memory_ceiling() -> u64 {
        1024
    }
    pub fn disk_floor() -> u64 {
        500
    }
    pub fn check_interval() -> u64 {
        30
    }

    // Update defaults
    pub fn cutoff_months() -> u32 {
        3
    }
    pub fn resolved_statuses() -> Vec<String> {
        vec!["MEGOLDOTT".into()]
    }
    pub fn terminal_statuses() -> Vec<String> {
        vec!["MEGOLDOTT".into(), "TÖRÖLT".into(), "MEGOLDATLAN".into()]
    }
    pub fn retry_file() -> String {
        "resolution_retry.txt".into()
    }

    // Date defaults
    pub fn month_names() -> BTreeMap<String, u32> {
        [
            "január",
            "február",
            "március",
            "április",
            "május",
            "június",
            "július",
            "augusztus",
            "szeptember",
            "október",
            "november",
            "december",
        ]
        .iter()
        .zip(1..)
        .map(|(name, month)| (name.to_string(), month))
        .collect()
    }
    pub fn date_formats() -> Vec<String> {
        vec!["%Y-%m-%d".into(), "%Y.%m.%d".into(), "%Y. %m. %d.".into()]
    }
}
