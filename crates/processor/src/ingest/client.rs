//! Log client seam
//!
//! The engine reads records through [`LogClient`] so the durable log can be
//! Kafka in production and an in-process log in tests. Offsets passed to
//! `commit` and `resume` are the last offset applied per partition; adapters
//! translate to whatever their log uses for "next position".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// One record read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
    /// Broker-side timestamp, used when the payload carries no event time
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    pub fn new(partition: u32, offset: u64, payload: Vec<u8>) -> Self {
        Self {
            partition,
            offset,
            payload,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Source of log records with manual offset commits
#[async_trait]
pub trait LogClient: Send {
    /// Up to `max_records` records, waiting at most `timeout` for the first
    async fn poll_batch(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<LogRecord>>;

    /// Mark records up to and including these offsets as consumed
    async fn commit(&mut self, offsets: &BTreeMap<u32, u64>) -> Result<()>;

    /// Continue after these offsets, one per partition
    ///
    /// Clients whose log already tracks committed positions may ignore this:
    /// commits only ever trail the latest checkpoint and replayed records are
    /// skipped by the engine.
    async fn resume(&mut self, positions: &BTreeMap<u32, u64>) -> Result<()> {
        let _ = positions;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    partitions: BTreeMap<u32, Vec<LogRecord>>,
    committed: BTreeMap<u32, u64>,
    commit_calls: usize,
}

/// In-process partitioned log
///
/// Cloning shares the same log, so a test can keep appending while a client
/// reads, and start a fresh client after a simulated crash.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<MemoryLogInner>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its offset
    pub fn append(&self, partition: u32, payload: impl Into<Vec<u8>>) -> u64 {
        let mut inner = self.inner.lock();
        let records = inner.partitions.entry(partition).or_default();
        let offset = records.len() as u64;
        records.push(LogRecord::new(partition, offset, payload.into()));
        offset
    }

    pub fn append_json(&self, partition: u32, value: &serde_json::Value) -> u64 {
        self.append(partition, value.to_string())
    }

    /// Last committed offset per partition
    pub fn committed(&self) -> BTreeMap<u32, u64> {
        self.inner.lock().committed.clone()
    }

    pub fn commit_calls(&self) -> usize {
        self.inner.lock().commit_calls
    }

    pub fn len(&self) -> usize {
        self.inner.lock().partitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A client positioned after the committed offsets, like a consumer
    /// rejoining its group
    pub fn client(&self) -> MemoryLogClient {
        let positions = self
            .committed()
            .into_iter()
            .map(|(partition, offset)| (partition, offset + 1))
            .collect();
        MemoryLogClient {
            log: self.clone(),
            positions,
        }
    }

    /// A client that reads every partition from the beginning
    pub fn client_from_start(&self) -> MemoryLogClient {
        MemoryLogClient {
            log: self.clone(),
            positions: BTreeMap::new(),
        }
    }
}

/// Reader over a [`MemoryLog`]
///
/// Batches interleave partitions one record at a time in partition order.
#[derive(Debug)]
pub struct MemoryLogClient {
    log: MemoryLog,
    /// Next offset to read per partition
    positions: BTreeMap<u32, u64>,
}

impl MemoryLogClient {
    fn take_batch(&mut self, max_records: usize) -> Vec<LogRecord> {
        let inner = self.log.inner.lock();
        let mut batch = Vec::new();
        loop {
            let mut progressed = false;
            for (partition, records) in &inner.partitions {
                if batch.len() >= max_records {
                    return batch;
                }
                let next = self.positions.entry(*partition).or_insert(0);
                if let Some(record) = records.get(*next as usize) {
                    batch.push(record.clone());
                    *next += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return batch;
            }
        }
    }
}

#[async_trait]
impl LogClient for MemoryLogClient {
    async fn poll_batch(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<LogRecord>> {
        let batch = self.take_batch(max_records);
        if batch.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }

    async fn commit(&mut self, offsets: &BTreeMap<u32, u64>) -> Result<()> {
        let mut inner = self.log.inner.lock();
        for (partition, offset) in offsets {
            let committed = inner.committed.entry(*partition).or_insert(*offset);
            *committed = (*committed).max(*offset);
        }
        inner.commit_calls += 1;
        debug!(partitions = offsets.len(), "Committed offsets to memory log");
        Ok(())
    }

    async fn resume(&mut self, positions: &BTreeMap<u32, u64>) -> Result<()> {
        for (partition, offset) in positions {
            let next = self.positions.entry(*partition).or_insert(0);
            *next = (*next).max(offset + 1);
        }
        Ok(())
    }
}
