// src/pipeline/update.rs

//! Differential status updates.
//!
//! Stored reports are split by a cutoff date into two groups:
//!
//! - **Recent** (reported on or after the cutoff): statuses are compared
//!   against the listing pages only. No detail page is fetched unless the
//!   listing shows a change.
//! - **Old pending** (reported before the cutoff, not in a terminal status):
//!   taken straight from the store, since the listing is too deep to scan.
//!
//! Both groups are then rescanned: detail pages are fetched and the store is
//! updated in place, one write per changed record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use futures::StreamExt;

use crate::error::{AppError, Result};
use crate::models::{Config, Record, RecordSummary, UpdateConfig, same_status};
use crate::pipeline::FetchPool;
use crate::services::RecordFetcher;
use crate::storage::{IdentityIndex, ShardStore};
use crate::utils::log::{header, summary};
use crate::utils::{read_url_list, write_url_list};

/// Outcome of a rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    /// Detail pages fetched successfully
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Identities that were not in the store yet
    pub inserted: usize,
    pub failed: usize,
    /// Resolved reports whose resolution date could not be found
    pub missing_resolution: Vec<String>,
    /// Identities whose detail page was fetched in this run
    pub rescanned: BTreeSet<String>,
}

impl RescanReport {
    pub fn log_summary(&self) {
        summary(
            "Rescan finished",
            &[
                ("Checked", self.checked.to_string()),
                ("Updated", self.updated.to_string()),
                ("Unchanged", self.unchanged.to_string()),
                ("Inserted", self.inserted.to_string()),
                ("Failed", self.failed.to_string()),
                (
                    "Missing resolution date",
                    self.missing_resolution.len().to_string(),
                ),
            ],
        );
    }
}

/// Cutoff for splitting recent and old reports.
///
/// An explicit date wins; otherwise `months` (or the configured default)
/// times 30 days before `today`.
pub fn resolve_cutoff(
    update: &UpdateConfig,
    months: Option<u32>,
    explicit: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    if let Some(date) = explicit {
        return date;
    }
    let mut update = update.clone();
    if let Some(months) = months {
        update.cutoff_months = months;
    }
    update.cutoff_from(today)
}

/// Finds and refreshes reports whose status may have changed.
pub struct UpdateScheduler<'a> {
    fetcher: &'a dyn RecordFetcher,
    store: &'a ShardStore,
    config: &'a Config,
}

impl<'a> UpdateScheduler<'a> {
    pub fn new(fetcher: &'a dyn RecordFetcher, store: &'a ShardStore, config: &'a Config) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Recent reports whose listing status differs from the stored one.
    ///
    /// Also collects reports the listing shows as resolved while the stored
    /// record has no resolution date. Listing pages are walked from the
    /// newest until a page reaches past the cutoff.
    pub async fn detect_recent_changes(&self, cutoff: NaiveDate) -> Result<BTreeSet<String>> {
        let stored = self.store.load_summaries()?;
        let update = &self.config.update;
        let mut changed = BTreeSet::new();
        let mut next = Some(self.config.crawler.page_url(1));
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.config.crawler.max_pages {
                log::warn!("Page limit {} reached during change detection", pages);
                break;
            }
            let page = match self.fetcher.fetch_listing_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    log::error!("Listing page {} failed, detection stops here: {}", url, e);
                    break;
                }
            };
            pages += 1;
            if page.entries.is_empty() {
                break;
            }

            let mut oldest: Option<NaiveDate> = None;
            for entry in &page.entries {
                let known = stored.get(&entry.url);
                if let Some(date) = entry.date.or(known.map(|s| s.report_date)) {
                    oldest = Some(oldest.map_or(date, |o| o.min(date)));
                }

                let Some(known) = known.filter(|s| s.report_date >= cutoff) else {
                    continue;
                };
                // A card without a badge says nothing about the status.
                let Some(status) = entry.status.as_deref() else {
                    continue;
                };
                let status_changed = !same_status(Some(status), known.status.as_deref());
                let newly_resolved =
                    update.is_resolved(Some(status)) && known.resolution_date.is_none();
                if status_changed || newly_resolved {
                    log::info!(
                        "Status change: {} ({} -> {})",
                        entry.url,
                        known.status.as_deref().unwrap_or("-"),
                        status
                    );
                    changed.insert(entry.url.clone());
                }
            }

            if oldest.is_some_and(|date| date < cutoff) {
                log::info!("Page {} reaches past the cutoff {}", pages, cutoff);
                break;
            }
            next = page.next_page_url;
        }

        log::info!("{} recent changes found on {} pages", changed.len(), pages);
        Ok(changed)
    }

    /// Stored reports older than `cutoff` that are not in a terminal status.
    pub fn load_old_pending(&self, cutoff: NaiveDate) -> Result<BTreeSet<String>> {
        old_pending(self.store, &self.config.update, cutoff)
    }

    /// Fetch each identity and write changes to the store immediately.
    pub async fn rescan(&self, identities: &[String]) -> Result<RescanReport> {
        let stored = self.store.load_summaries()?;
        let index: IdentityIndex = stored.keys().cloned().collect();
        let pool = FetchPool::new(self.config.crawler.max_concurrent);
        let mut report = RescanReport::default();

        let mut results = pool.fetch_records(self.fetcher, identities.to_vec());
        while let Some((identity, result)) = results.next().await {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Rescan of {} failed: {}", identity, e);
                    report.failed += 1;
                    continue;
                }
            };
            report.checked += 1;
            report.rescanned.insert(identity);
            self.apply(&record, stored.get(&record.identity), &index, &mut report)?;
        }

        Ok(report)
    }

    fn apply(
        &self,
        record: &Record,
        known: Option<&RecordSummary>,
        index: &IdentityIndex,
        report: &mut RescanReport,
    ) -> Result<()> {
        let update = &self.config.update;
        let resolution_known = record.resolution_date.is_some()
            || known.is_some_and(|s| s.resolution_date.is_some());
        if update.is_resolved(record.status.as_deref()) && !resolution_known {
            let e = AppError::ResolutionDateMissing {
                identity: record.identity.clone(),
            };
            log::warn!("{}", e);
            report.missing_resolution.push(record.identity.clone());
        }

        let Some(known) = known else {
            if self.store.merge_insert(record, index)? {
                report.inserted += 1;
            } else {
                report.unchanged += 1;
            }
            return Ok(());
        };

        let status_changed = !same_status(record.status.as_deref(), known.status.as_deref());
        let status = if status_changed {
            record.status.as_deref()
        } else {
            known.status.as_deref()
        };
        if self
            .store
            .update_status(known, status, record.resolution_date)?
        {
            log::info!(
                "Updated {}: {} -> {} (resolved {})",
                record.identity,
                known.status.as_deref().unwrap_or("-"),
                status.unwrap_or("-"),
                record
                    .resolution_date
                    .map_or("-".to_string(), |d| d.to_string())
            );
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
        Ok(())
    }

    fn retry_path(&self) -> PathBuf {
        self.store.root_dir().join(&self.config.update.retry_file)
    }

    /// Identities waiting for a resolution date from earlier runs.
    pub fn load_retry_list(&self) -> Result<Vec<String>> {
        let path = self.retry_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_url_list(&path)
    }

    /// Merge this run's flags into the retry file.
    ///
    /// Identities fetched in this run are dropped unless they were flagged
    /// again. Failed fetches keep their entry for the next pass. The file is
    /// removed once the list is empty.
    pub fn update_retry_list(&self, report: &RescanReport) -> Result<usize> {
        let mut pending: BTreeSet<String> = self
            .load_retry_list()?
            .into_iter()
            .filter(|id| !report.rescanned.contains(id))
            .collect();
        pending.extend(report.missing_resolution.iter().cloned());

        let path = self.retry_path();
        if pending.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            return Ok(0);
        }
        let count = write_url_list(&path, &pending)?;
        log::info!("{} reports queued for resolution retry in {}", count, path.display());
        Ok(count)
    }
}

/// Old pending reports, read from the store alone.
fn old_pending(
    store: &ShardStore,
    update: &UpdateConfig,
    cutoff: NaiveDate,
) -> Result<BTreeSet<String>> {
    let pending: BTreeSet<String> = store
        .load_summaries()?
        .into_values()
        .filter(|s| s.report_date < cutoff && !update.is_terminal(s.status.as_deref()))
        .map(|s| s.identity)
        .collect();
    log::info!("{} old pending reports before {}", pending.len(), cutoff);
    Ok(pending)
}

fn open_store(config: &Config) -> Result<ShardStore> {
    ShardStore::open(&config.storage.data_dir)
}

fn save_list(output: Option<&Path>, urls: &BTreeSet<String>) -> Result<()> {
    if let Some(path) = output {
        let count = write_url_list(path, urls)?;
        log::info!("Saved {} URLs to {}", count, path.display());
    }
    Ok(())
}

/// Detect recent status changes, optionally saving them to `output`.
pub async fn run_detect_changes(
    config: &Config,
    fetcher: &dyn RecordFetcher,
    cutoff: NaiveDate,
    output: Option<&Path>,
) -> Result<BTreeSet<String>> {
    header("Detecting recent status changes");
    let store = open_store(config)?;
    let changed = UpdateScheduler::new(fetcher, &store, config)
        .detect_recent_changes(cutoff)
        .await?;
    save_list(output, &changed)?;
    Ok(changed)
}

/// List old pending reports, optionally saving them to `output`.
pub fn run_old_pending(
    config: &Config,
    cutoff: NaiveDate,
    output: Option<&Path>,
) -> Result<BTreeSet<String>> {
    header("Extracting old pending reports");
    let store = open_store(config)?;
    let pending = old_pending(&store, &config.update, cutoff)?;
    save_list(output, &pending)?;
    Ok(pending)
}

/// Rescan the given identities and maintain the retry file.
pub async fn run_rescan(
    config: &Config,
    fetcher: &dyn RecordFetcher,
    identities: &[String],
) -> Result<RescanReport> {
    header(&format!("Rescanning {} reports", identities.len()));
    let store = open_store(config)?;
    let scheduler = UpdateScheduler::new(fetcher, &store, config);

    let report = scheduler.rescan(identities).await?;
    scheduler.update_retry_list(&report)?;
    report.log_summary();
    Ok(report)
}

/// Full differential update: recent changes, old pending and earlier
/// resolution retries, rescanned together.
pub async fn run_update(
    config: &Config,
    fetcher: &dyn RecordFetcher,
    cutoff: NaiveDate,
) -> Result<RescanReport> {
    header("Differential update");
    let store = open_store(config)?;
    let scheduler = UpdateScheduler::new(fetcher, &store, config);

    let recent = scheduler.detect_recent_changes(cutoff).await?;
    let old = scheduler.load_old_pending(cutoff)?;
    let retry = scheduler.load_retry_list()?;
    log::info!(
        "Rescan targets: {} recent, {} old pending, {} retries",
        recent.len(),
        old.len(),
        retry.len()
    );

    let targets: Vec<String> = recent
        .into_iter()
        .chain(old)
        .chain(retry)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let report = scheduler.rescan(&targets).await?;
    scheduler.update_retry_list(&report)?;
    report.log_summary();
    Ok(report)
}
