//! Local filesystem shard store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── YYYY-MM.jsonl         # One shard per report month, newest first
//! └── resolution_retry.txt  # Written by the update pipeline
//! ```
//!
//! ## Guarantees
//!
//! - **Ordering**: each shard is sorted by descending report date; a new
//!   record goes right above the first record dated on or before it.
//! - **Integrity**: a line that does not parse aborts the operation with the
//!   file and line number. Nothing is skipped.
//! - **Atomic rewrites**: shards are written to a temp file and renamed.
//!   Existing lines are written back byte-for-byte.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::{Record, RecordSummary};
use crate::storage::{IdentityIndex, ResumePoint, ShardKey, resolve_shard_key};

/// One persisted line with its decoded tracked fields.
#[derive(Debug, Clone)]
struct ShardEntry {
    /// 1-based line in the file it was read from, 0 if not yet written
    line_no: usize,
    line: String,
    summary: RecordSummary,
}

/// Month-sharded JSONL record store.
#[derive(Debug, Clone)]
pub struct ShardStore {
    root_dir: PathBuf,
}

impl ShardStore {
    /// Open (creating if needed) the store rooted at `root_dir`.
    ///
    /// Temp files left behind by an interrupted rewrite are removed; the
    /// shard they belonged to is still intact.
    pub fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir)?;
        let store = Self { root_dir };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Full path of the shard file for `key`.
    pub fn shard_path(&self, key: ShardKey) -> PathBuf {
        self.root_dir.join(key.file_name())
    }

    /// All shard keys present on disk, oldest month first.
    pub fn shard_keys(&self) -> Result<Vec<ShardKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<ShardKey>() {
                Ok(key) => keys.push(key),
                Err(_) => log::debug!("Ignoring non-shard file {}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Build the identity index from every shard.
    pub fn load_identity_index(&self) -> Result<IdentityIndex> {
        let mut identities = Vec::new();
        for key in self.shard_keys()? {
            identities.extend(self.read_shard(key)?.into_iter().map(|e| e.summary.identity));
        }
        Ok(identities.into_iter().collect())
    }

    /// Tracked fields of every stored record, keyed by identity.
    pub fn load_summaries(&self) -> Result<HashMap<String, RecordSummary>> {
        let mut summaries = HashMap::new();
        for key in self.shard_keys()? {
            for entry in self.read_shard(key)? {
                summaries.insert(entry.summary.identity.clone(), entry.summary);
            }
        }
        Ok(summaries)
    }

    /// Full records of one shard in file order.
    pub fn load_shard(&self, key: ShardKey) -> Result<Vec<Record>> {
        let path = self.shard_path(key);
        self.read_shard(key)?
            .iter()
            .map(|entry| {
                serde_json::from_str(&entry.line)
                    .map_err(|e| AppError::corrupt_shard(&path, entry.line_no, e))
            })
            .collect()
    }

    /// Insert `record` unless its identity is already in `index`.
    ///
    /// Returns whether the record was written. The identity is claimed in
    /// `index` before the write so a batch cannot store it twice.
    pub fn merge_insert(&self, record: &Record, index: &IdentityIndex) -> Result<bool> {
        if !index.claim(&record.identity) {
            return Ok(false);
        }
        let key = resolve_shard_key(record.report_date);
        match self.insert_batch(key, std::slice::from_ref(record)) {
            Ok(inserted) => Ok(inserted > 0),
            Err(e) => {
                index.release(&record.identity);
                Err(e)
            }
        }
    }

    /// Insert records into one shard with a single rewrite, in order.
    ///
    /// The outcome equals inserting them one at a time. Records whose
    /// identity is already in the shard are skipped. Returns the number
    /// inserted.
    pub fn insert_batch(&self, key: ShardKey, records: &[Record]) -> Result<usize> {
        let mut entries = self.read_shard(key)?;
        let mut present: HashSet<String> =
            entries.iter().map(|e| e.summary.identity.clone()).collect();

        let mut inserted = 0;
        for record in records {
            if resolve_shard_key(record.report_date) != key {
                return Err(AppError::validation(format!(
                    "record {} dated {} does not belong to shard {}",
                    record.identity, record.report_date, key
                )));
            }
            if !present.insert(record.identity.clone()) {
                continue;
            }

            let position = entries
                .iter()
                .position(|e| e.summary.report_date <= record.report_date)
                .unwrap_or(entries.len());
            entries.insert(
                position,
                ShardEntry {
                    line_no: 0,
                    line: record.to_line()?,
                    summary: record.summary(),
                },
            );
            inserted += 1;
        }

        if inserted > 0 {
            self.write_shard(key, &entries)?;
            log::debug!("Shard {}: +{} ({} total)", key, inserted, entries.len());
        }
        Ok(inserted)
    }

    /// Update status and resolution date of a stored record in place.
    ///
    /// The record keeps its position, report date and payload. A resolution
    /// date that is already set is never replaced. Returns whether the shard
    /// changed.
    pub fn update_status(
        &self,
        stored: &RecordSummary,
        status: Option<&str>,
        resolution_date: Option<NaiveDate>,
    ) -> Result<bool> {
        let key = resolve_shard_key(stored.report_date);
        let path = self.shard_path(key);
        let mut entries = self.read_shard(key)?;

        let Some(position) = entries
            .iter()
            .position(|e| e.summary.identity == stored.identity)
        else {
            log::warn!("{} not found in shard {}", stored.identity, key);
            return Ok(false);
        };

        let mut record: Record = serde_json::from_str(&entries[position].line)
            .map_err(|e| AppError::corrupt_shard(&path, entries[position].line_no, e))?;

        let mut changed = false;
        if record.status.as_deref() != status {
            record.status = status.map(str::to_string);
            changed = true;
        }
        if record.resolution_date.is_none() && resolution_date.is_some() {
            record.resolution_date = resolution_date;
            changed = true;
        }
        if !changed {
            return Ok(false);
        }

        entries[position] = ShardEntry {
            line_no: entries[position].line_no,
            line: record.to_line()?,
            summary: record.summary(),
        };
        self.write_shard(key, &entries)?;
        Ok(true)
    }

    /// Oldest stored report date and the total record count.
    ///
    /// Only the last line of each shard is consulted for the date, which by
    /// the ordering guarantee is that shard's oldest record.
    pub fn compute_resume_point(&self) -> Result<ResumePoint> {
        let mut point = ResumePoint::default();
        for key in self.shard_keys()? {
            let entries = self.read_shard(key)?;
            point.total_count += entries.len();
            if let Some(last) = entries.last() {
                let date = last.summary.report_date;
                point.oldest_date = Some(point.oldest_date.map_or(date, |d| d.min(date)));
            }
        }
        Ok(point)
    }

    /// Read a shard, validating every line. Missing shards are empty.
    fn read_shard(&self, key: ShardKey) -> Result<Vec<ShardEntry>> {
        let path = self.shard_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut entries = Vec::new();
        for (i, raw) in content.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let summary: RecordSummary = serde_json::from_str(line).map_err(|e| {
                log::error!("Malformed line {} in {}: {}", i + 1, path.display(), line);
                AppError::corrupt_shard(&path, i + 1, e)
            })?;
            entries.push(ShardEntry {
                line_no: i + 1,
                line: line.to_string(),
                summary,
            });
        }
        Ok(entries)
    }

    /// Rewrite a shard atomically (write to temp, then rename).
    fn write_shard(&self, key: ShardKey, entries: &[ShardEntry]) -> Result<()> {
        let path = self.shard_path(key);
        let tmp = path.with_extension("tmp");

        let mut bytes = Vec::with_capacity(entries.iter().map(|e| e.line.len() + 1).sum());
        for entry in entries {
            bytes.extend_from_slice(entry.line.as_bytes());
            bytes.push(b'\n');
        }

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove `YYYY-MM.tmp` files; other temp files are not ours.
    fn remove_stale_temp_files(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root_dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("tmp") {
                continue;
            }
            let is_shard_temp = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.parse::<ShardKey>().is_ok());
            if is_shard_temp {
                log::warn!("Removing stale temp file {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
