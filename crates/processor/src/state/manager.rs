//! Checkpoint scheduling, persistence and recovery
//!
//! The manager moves through `Idle -> Snapshotting -> Persisting -> Idle`.
//! Snapshotting is a short read-locked copy of the store; encoding and
//! persisting run on a background task that retries the same immutable bytes, so ingestion keeps
//! going while a checkpoint is written. Offsets are handed back for commit only
//! after the write succeeded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::store::StateStore;
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult, ProcessorError, Result};
use crate::metrics::EngineMetrics;

/// Where the manager is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    Idle,
    Snapshotting,
    Persisting,
}

/// A checkpoint that reached durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCheckpoint {
    pub seq: u64,
    /// Offsets safe to commit to the log
    pub offsets: BTreeMap<u32, u64>,
    pub size_bytes: u64,
    pub attempts: u32,
}

/// State recovered at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredCheckpoint {
    pub seq: u64,
    pub offsets: BTreeMap<u32, u64>,
    pub accumulators: usize,
    pub created_at: DateTime<Utc>,
}

/// Statistics about checkpointing
#[derive(Debug, Clone, Default)]
pub struct CheckpointStats {
    pub checkpoints_persisted: u64,
    /// Individual failed write attempts, including retried ones
    pub failed_attempts: u64,
    pub restores: u64,
    pub last_seq: Option<u64>,
    pub last_checkpoint_time: Option<DateTime<Utc>>,
    pub last_checkpoint_duration_ms: Option<u64>,
    pub total_bytes_checkpointed: u64,
}

/// Drives periodic checkpoints of a [`StateStore`]
pub struct CheckpointManager {
    store: StateStore,
    backend: Arc<dyn CheckpointStore>,
    config: CheckpointConfig,
    metrics: EngineMetrics,
    phase: CheckpointPhase,
    next_seq: u64,
    events_since_checkpoint: u64,
    last_trigger: Instant,
    in_flight: Option<JoinHandle<CheckpointResult<PersistedCheckpoint>>>,
    stats: Arc<RwLock<CheckpointStats>>,
}

impl CheckpointManager {
    pub fn new(
        store: StateStore,
        backend: Arc<dyn CheckpointStore>,
        config: CheckpointConfig,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            metrics,
            phase: CheckpointPhase::Idle,
            next_seq: 1,
            events_since_checkpoint: 0,
            last_trigger: Instant::now(),
            in_flight: None,
            stats: Arc::new(RwLock::new(CheckpointStats::default())),
        }
    }

    pub fn phase(&self) -> CheckpointPhase {
        self.phase
    }

    pub fn stats(&self) -> CheckpointStats {
        self.stats.read().clone()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Restore the store from the latest checkpoint
    ///
    /// Returns `None` on a fresh start. A corrupt latest checkpoint is fatal.
    pub async fn recover(&mut self) -> Result<Option<RecoveredCheckpoint>> {
        let location = self.backend.location();
        let checkpoint = match self.backend.load_latest().await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                info!(location = %location, "No checkpoint found, starting from empty state");
                return Ok(None);
            }
            Err(e) => {
                error!(location = %location, error = %e, "Failed to load latest checkpoint");
                return Err(match e {
                    CheckpointError::Io(io) => CheckpointError::RestoreCorruption {
                        location,
                        reason: io.to_string(),
                    }
                    .into(),
                    other => other.into(),
                });
            }
        };

        let snapshot = checkpoint.snapshot(&location)?;
        let recovered = RecoveredCheckpoint {
            seq: checkpoint.seq(),
            offsets: snapshot.applied_offsets.clone(),
            accumulators: snapshot.accumulator_count(),
            created_at: checkpoint.metadata.created_at,
        };
        self.store.restore(snapshot);
        self.next_seq = checkpoint.seq() + 1;
        self.events_since_checkpoint = 0;
        self.last_trigger = Instant::now();
        self.stats.write().restores += 1;
        self.metrics.last_checkpoint_seq.set(checkpoint.seq() as i64);

        info!(
            seq = recovered.seq,
            accumulators = recovered.accumulators,
            partitions = recovered.offsets.len(),
            "Recovered from checkpoint"
        );
        Ok(Some(recovered))
    }

    /// Count records processed since the last checkpoint
    pub fn record_events(&mut self, count: u64) {
        self.events_since_checkpoint += count;
    }

    /// Whether the time or count trigger has fired
    pub fn is_due(&self) -> bool {
        self.events_since_checkpoint >= self.config.every_n_events
            || (self.events_since_checkpoint > 0 && self.last_trigger.elapsed() >= self.config.interval())
    }

    /// Start a checkpoint if one is due and none is in flight
    ///
    /// Returns the sequence number of the started checkpoint.
    pub fn maybe_checkpoint(&mut self) -> Result<Option<u64>> {
        if self.phase != CheckpointPhase::Idle || !self.is_due() {
            return Ok(None);
        }
        self.begin().map(Some)
    }

    fn begin(&mut self) -> Result<u64> {
        self.phase = CheckpointPhase::Snapshotting;
        let snapshot = self.store.snapshot();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events_since_checkpoint = 0;
        self.last_trigger = Instant::now();

        debug!(
            seq = seq,
            accumulators = snapshot.accumulator_count(),
            "Snapshot taken, persisting checkpoint"
        );

        let backend = Arc::clone(&self.backend);
        let stats = Arc::clone(&self.stats);
        let metrics = self.metrics.clone();
        let config = self.config.clone();
        self.in_flight = Some(tokio::spawn(async move {
            // encoded off the ingest loop
            let checkpoint = match Checkpoint::from_snapshot(seq, &snapshot) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    error!(seq = seq, error = %e, "Failed to encode checkpoint");
                    return Err(e);
                }
            };
            persist_with_retry(backend, checkpoint, config, stats, metrics).await
        }));
        self.phase = CheckpointPhase::Persisting;
        Ok(seq)
    }

    /// Collect the in-flight checkpoint if it has finished
    pub async fn poll_completed(&mut self) -> Result<Option<PersistedCheckpoint>> {
        match &self.in_flight {
            Some(handle) if handle.is_finished() => self.wait_in_flight().await,
            _ => Ok(None),
        }
    }

    /// Wait for the in-flight checkpoint, if any
    pub async fn wait_in_flight(&mut self) -> Result<Option<PersistedCheckpoint>> {
        let Some(handle) = self.in_flight.take() else {
            return Ok(None);
        };
        let outcome = handle
            .await
            .map_err(|e| ProcessorError::Unexpected(format!("checkpoint task failed: {e}")))?;
        self.phase = CheckpointPhase::Idle;
        let persisted = outcome?;
        self.metrics.checkpoints_persisted.inc();
        self.metrics.last_checkpoint_seq.set(persisted.seq as i64);
        Ok(Some(persisted))
    }

    /// Snapshot and persist right away, waiting for the result
    pub async fn checkpoint_now(&mut self) -> Result<PersistedCheckpoint> {
        self.wait_in_flight().await?;
        let seq = self.begin()?;
        self.wait_in_flight()
            .await?
            .ok_or_else(|| ProcessorError::Unexpected(format!("checkpoint {seq} did not complete")))
    }
}

async fn persist_with_retry(
    backend: Arc<dyn CheckpointStore>,
    checkpoint: Checkpoint,
    config: CheckpointConfig,
    stats: Arc<RwLock<CheckpointStats>>,
    metrics: EngineMetrics,
) -> CheckpointResult<PersistedCheckpoint> {
    let seq = checkpoint.seq();
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match backend.persist(&checkpoint).await {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let mut stats = stats.write();
                stats.checkpoints_persisted += 1;
                stats.last_seq = Some(seq);
                stats.last_checkpoint_time = Some(Utc::now());
                stats.last_checkpoint_duration_ms = Some(duration_ms);
                stats.total_bytes_checkpointed += checkpoint.metadata.size_bytes;
                debug!(seq = seq, attempts = attempt, duration_ms = duration_ms, "Checkpoint persisted");
                return Ok(PersistedCheckpoint {
                    seq,
                    offsets: checkpoint.metadata.partition_offsets.clone(),
                    size_bytes: checkpoint.metadata.size_bytes,
                    attempts: attempt,
                });
            }
            Err(e) => {
                stats.write().failed_attempts += 1;
                metrics.checkpoint_failures.inc();
                if attempt >= config.max_persist_retries {
                    error!(seq = seq, attempts = attempt, error = %e, "Checkpoint persistence failed");
                    return Err(CheckpointError::PersistenceFailure {
                        seq,
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                warn!(seq = seq, attempt = attempt, error = %e, "Checkpoint write failed, retrying");
                tokio::time::sleep(config.retry_backoff() * attempt).await;
            }
        }
    }
}
