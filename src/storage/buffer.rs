//! Write buffering in front of the shard store.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::Record;
use crate::storage::{
    IdentityIndex, ResourceMonitor, ResourcePressure, ShardKey, ShardStore, resolve_shard_key,
};

/// Counters reported by a [`BufferedWriter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records accepted into the buffer
    pub queued: usize,
    /// Records written to shards
    pub stored: usize,
    /// Records rejected because their identity was already known
    pub duplicates: usize,
    /// Completed flushes
    pub flushes: usize,
    /// Flushes forced by memory or disk pressure
    pub pressure_flushes: usize,
}

/// Batches records per shard and writes each shard once per flush.
///
/// A flush happens when the buffer holds `capacity` records or when the
/// resource monitor reports pressure. Whatever is still buffered when the
/// writer goes out of scope is flushed by `Drop`, so an interrupted crawl
/// keeps everything it fetched. Prefer [`BufferedWriter::finish`], which
/// reports flush errors instead of only logging them.
#[derive(Debug)]
pub struct BufferedWriter {
    store: Arc<ShardStore>,
    index: Arc<IdentityIndex>,
    queues: BTreeMap<ShardKey, Vec<Record>>,
    buffered: usize,
    capacity: usize,
    monitor: Option<ResourceMonitor>,
    stats: WriterStats,
}

impl BufferedWriter {
    /// A writer flushing every `capacity` records (at least 1).
    pub fn new(store: Arc<ShardStore>, index: Arc<IdentityIndex>, capacity: usize) -> Self {
        Self {
            store,
            index,
            queues: BTreeMap::new(),
            buffered: 0,
            capacity: capacity.max(1),
            monitor: None,
            stats: WriterStats::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    /// Queue a record. Returns false if its identity is already known.
    ///
    /// May flush. Fails with [`AppError::ResourceExhausted`] when free disk
    /// is still below the floor after a forced flush.
    pub fn insert(&mut self, record: Record) -> Result<bool> {
        if !self.index.claim(&record.identity) {
            self.stats.duplicates += 1;
            return Ok(false);
        }

        let key = resolve_shard_key(record.report_date);
        self.queues.entry(key).or_default().push(record);
        self.buffered += 1;
        self.stats.queued += 1;

        if self.buffered >= self.capacity {
            self.flush()?;
        }
        self.relieve_pressure()?;
        Ok(true)
    }

    /// Write every queued record, one rewrite per shard.
    ///
    /// On error the failed shard and all shards not yet written stay queued.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffered == 0 {
            return Ok(0);
        }

        let mut written = 0;
        while let Some((key, records)) = self.queues.pop_first() {
            match self.store.insert_batch(key, &records) {
                Ok(inserted) => {
                    written += inserted;
                    self.buffered -= records.len();
                }
                Err(e) => {
                    log::error!("Flush of shard {} failed: {}", key, e);
                    self.queues.insert(key, records);
                    return Err(e);
                }
            }
        }

        self.stats.stored += written;
        self.stats.flushes += 1;
        log::debug!("Flushed {} records", written);
        Ok(written)
    }

    /// Number of records waiting to be written.
    pub fn pending(&self) -> usize {
        self.buffered
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Flush and return the final counters.
    pub fn finish(mut self) -> Result<WriterStats> {
        self.flush()?;
        Ok(self.stats.clone())
    }

    fn relieve_pressure(&mut self) -> Result<()> {
        let Some(pressure) = self.monitor.as_mut().and_then(ResourceMonitor::poll) else {
            return Ok(());
        };

        log::warn!("Resource pressure ({}), flushing {} records", pressure, self.buffered);
        self.flush()?;
        self.stats.pressure_flushes += 1;

        if let ResourcePressure::Disk { .. } = pressure {
            if let Some(still) = self.monitor.as_mut().and_then(ResourceMonitor::disk_pressure) {
                return Err(AppError::ResourceExhausted(still.to_string()));
            }
        }
        Ok(())
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if self.buffered == 0 {
            return;
        }
        log::info!("Flushing {} buffered records on shutdown", self.buffered);
        if let Err(e) = self.flush() {
            log::error!("Buffered records lost on shutdown: {}", e);
        }
    }
}
