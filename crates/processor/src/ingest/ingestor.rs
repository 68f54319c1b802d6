//! The ingestion loop
//!
//! One ingestor is the only writer of the state store. Each batch is decoded,
//! applied, finalized and published before checkpoint maintenance runs, and
//! offsets reach the log only after the checkpoint holding them is durable.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::client::{LogClient, LogRecord};
use crate::aggregation::{ApplyOutcome, WindowAggregator};
use crate::broker::SubscriptionBroker;
use crate::config::{IngestConfig, ProcessorConfig};
use crate::decoder::EventDecoder;
use crate::error::{ProcessorError, Result};
use crate::metrics::EngineMetrics;
use crate::query::QueryService;
use crate::state::{CheckpointManager, CheckpointStore, PersistedCheckpoint, RecoveredCheckpoint, StateStore};

/// What one batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: usize,
    pub decode_errors: usize,
    pub applied: usize,
    pub late_dropped: usize,
    pub replayed: usize,
    pub finalized: usize,
    pub delivered: usize,
    pub checkpoint_started: Option<u64>,
    /// Offsets handed to the log after a checkpoint completed
    pub committed: Option<BTreeMap<u32, u64>>,
}

/// Drives records from a [`LogClient`] through the engine
pub struct EventIngestor<L: LogClient> {
    log: L,
    config: IngestConfig,
    decoder: EventDecoder,
    aggregator: WindowAggregator,
    checkpoints: CheckpointManager,
    broker: Arc<SubscriptionBroker>,
    query: QueryService,
    metrics: EngineMetrics,
    halted: Option<String>,
}

impl<L: LogClient> EventIngestor<L> {
    pub fn new(
        config: &ProcessorConfig,
        log: L,
        checkpoint_store: Arc<dyn CheckpointStore>,
        metrics: EngineMetrics,
    ) -> Result<Self> {
        config.validate()?;
        let store = StateStore::new(&config.watermark);
        let aggregator = WindowAggregator::new(store.clone(), &config.windows)?;
        let checkpoints = CheckpointManager::new(
            store.clone(),
            checkpoint_store,
            config.checkpoint.clone(),
            metrics.clone(),
        );
        let broker = Arc::new(SubscriptionBroker::new(config.subscriptions.clone(), metrics.clone()));
        let query = QueryService::new(store, &config.query);

        Ok(Self {
            log,
            config: config.ingest.clone(),
            decoder: EventDecoder::new(config.decoder.clone()),
            aggregator,
            checkpoints,
            broker,
            query,
            metrics,
            halted: None,
        })
    }

    pub fn broker(&self) -> Arc<SubscriptionBroker> {
        Arc::clone(&self.broker)
    }

    pub fn query(&self) -> QueryService {
        self.query.clone()
    }

    pub fn store(&self) -> &StateStore {
        self.aggregator.store()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn checkpoints_mut(&mut self) -> &mut CheckpointManager {
        &mut self.checkpoints
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Restore the latest checkpoint and resume the log after its offsets
    pub async fn recover(&mut self) -> Result<Option<RecoveredCheckpoint>> {
        let recovered = self.checkpoints.recover().await?;
        if let Some(recovered) = &recovered {
            self.log.resume(&recovered.offsets).await?;
            self.metrics
                .open_accumulators
                .set(self.aggregator.store().open_accumulators() as i64);
        }
        Ok(recovered)
    }

    /// Poll one batch from the log and process it
    pub async fn poll_once(&mut self) -> Result<BatchReport> {
        self.ensure_running()?;
        let records = self
            .log
            .poll_batch(self.config.batch_size, self.config.poll_timeout())
            .await?;
        self.process_batch(records).await
    }

    /// Process one batch of records
    ///
    /// An empty batch still advances idle partitions and services checkpoints.
    pub async fn process_batch(&mut self, records: Vec<LogRecord>) -> Result<BatchReport> {
        self.ensure_running()?;
        let mut report = BatchReport {
            records: records.len(),
            ..Default::default()
        };

        let ingest_time = Utc::now();
        for record in &records {
            let event = match self.decoder.decode(record, ingest_time) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Discarding undecodable record"
                    );
                    self.metrics.decode_errors.inc();
                    self.aggregator.mark_consumed(record.partition, record.offset);
                    report.decode_errors += 1;
                    continue;
                }
            };

            match self.aggregator.apply(&event) {
                ApplyOutcome::Applied { windows } => {
                    trace!(
                        content_id = %event.content_id,
                        partition = event.partition,
                        offset = event.offset,
                        windows = windows,
                        "Applied event"
                    );
                    self.metrics.events_ingested.inc();
                    report.applied += 1;
                }
                ApplyOutcome::Late { watermark, late_by_ms } => {
                    warn!(
                        content_id = %event.content_id,
                        partition = event.partition,
                        offset = event.offset,
                        watermark = watermark.timestamp,
                        late_by_ms = late_by_ms,
                        "Dropping late event"
                    );
                    self.metrics.late_dropped_events.inc();
                    report.late_dropped += 1;
                }
                ApplyOutcome::WindowsClosed => {
                    debug!(
                        content_id = %event.content_id,
                        offset = event.offset,
                        "Dropping event for finalized windows"
                    );
                    self.metrics.late_dropped_events.inc();
                    report.late_dropped += 1;
                }
                ApplyOutcome::Replayed => {
                    self.metrics.replayed_records_skipped.inc();
                    report.replayed += 1;
                }
            }
        }

        let results = self.aggregator.finalize_ready(Utc::now());
        report.finalized = results.len();
        self.metrics.windows_finalized.inc_by(results.len() as u64);
        for result in &results {
            self.query.history().record(result);
            report.delivered += self.broker.publish(result).delivered;
        }
        let pruned = self.broker.prune_disconnected();
        if pruned > 0 {
            debug!(pruned = pruned, "Removed disconnected subscribers");
        }
        self.metrics
            .open_accumulators
            .set(self.aggregator.store().open_accumulators() as i64);

        if report.records > 0 || report.finalized > 0 {
            debug!(
                records = report.records,
                applied = report.applied,
                late = report.late_dropped,
                replayed = report.replayed,
                finalized = report.finalized,
                "Processed batch"
            );
        }

        self.checkpoints.record_events(records.len() as u64);
        let completed = self.checkpoints.poll_completed().await;
        if let Some(persisted) = self.halt_on_error(completed)? {
            report.committed = self.commit(&persisted).await;
        }
        let started = self.checkpoints.maybe_checkpoint();
        report.checkpoint_started = self.halt_on_error(started)?;

        Ok(report)
    }

    /// Run until `shutdown` flips to true or a fatal error occurs
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(batch_size = self.config.batch_size, "Ingestion started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let records = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.log.poll_batch(self.config.batch_size, self.config.poll_timeout()) => polled?,
            };
            if let Err(e) = self.process_batch(records).await {
                error!(error = %e, "Ingestion halted");
                return Err(e);
            }
        }
        self.shutdown().await
    }

    /// Write a final checkpoint and commit its offsets
    pub async fn shutdown(&mut self) -> Result<()> {
        self.ensure_running()?;
        let pending = self.checkpoints.wait_in_flight().await;
        if let Some(persisted) = self.halt_on_error(pending)? {
            self.commit(&persisted).await;
        }
        let last = self.checkpoints.checkpoint_now().await;
        let persisted = self.halt_on_error(last)?;
        self.commit(&persisted).await;
        info!(seq = persisted.seq, "Ingestion stopped after final checkpoint");
        Ok(())
    }

    async fn commit(&mut self, persisted: &PersistedCheckpoint) -> Option<BTreeMap<u32, u64>> {
        if persisted.offsets.is_empty() {
            return None;
        }
        match self.log.commit(&persisted.offsets).await {
            Ok(()) => {
                debug!(
                    seq = persisted.seq,
                    partitions = persisted.offsets.len(),
                    "Committed checkpointed offsets"
                );
                Some(persisted.offsets.clone())
            }
            Err(e) => {
                // the next checkpoint commits a superset of these offsets
                warn!(seq = persisted.seq, error = %e, "Offset commit failed");
                self.metrics.offset_commit_failures.inc();
                None
            }
        }
    }

    fn halt_on_error<T>(&mut self, outcome: Result<T>) -> Result<T> {
        outcome.map_err(|e| {
            if e.is_fatal() {
                error!(error = %e, "Fatal checkpoint failure, halting ingestion");
                self.halted = Some(e.to_string());
            }
            e
        })
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(ProcessorError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemoryLog;
    use crate::state::InMemoryCheckpointStore;
    use serde_json::json;

    fn config() -> ProcessorConfig {
        let mut config = ProcessorConfig::default();
        config.watermark.allowed_lateness_ms = 0;
        config.watermark.idle_timeout_ms = None;
        config.checkpoint.every_n_events = 1_000;
        config.checkpoint.interval_ms = 3_600_000;
        config
    }

    const T0: i64 = 1_704_067_200_000;

    #[tokio::test]
    async fn test_batch_counts_outcomes() {
        let log = MemoryLog::new();
        log.append_json(0, &json!({"event_time": T0, "content_id": "c", "session_id": "s", "kind": "play"}));
        log.append(0, "not json");
        log.append_json(0, &json!({"event_time": T0 + 120_000, "content_id": "c", "session_id": "s", "kind": "pause"}));
        log.append_json(0, &json!({"event_time": T0 + 1_000, "content_id": "c", "session_id": "s", "kind": "pause"}));

        let mut ingestor = EventIngestor::new(
            &config(),
            log.client(),
            Arc::new(InMemoryCheckpointStore::new()),
            EngineMetrics::default(),
        )
        .unwrap();

        let report = ingestor.poll_once().await.unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.decode_errors, 1);
        assert_eq!(report.applied, 2);
        assert_eq!(report.late_dropped, 1);
        // the first minute closed once the watermark reached T0 + 120s
        assert!(report.finalized >= 1);
        assert_eq!(ingestor.store().applied_offsets().get(&0), Some(&3));
    }

    #[tokio::test]
    async fn test_shutdown_checkpoints_and_commits() {
        let log = MemoryLog::new();
        log.append_json(1, &json!({"event_time": T0, "content_id": "c", "session_id": "s", "kind": "play"}));
        let backend = Arc::new(InMemoryCheckpointStore::new());

        let mut ingestor =
            EventIngestor::new(&config(), log.client(), backend.clone(), EngineMetrics::default()).unwrap();
        let report = ingestor.poll_once().await.unwrap();
        assert_eq!(report.committed, None);
        assert!(log.committed().is_empty());

        ingestor.shutdown().await.unwrap();
        assert_eq!(log.committed().get(&1), Some(&0));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let log = MemoryLog::new();
        log.append_json(0, &json!({"event_time": T0, "content_id": "c", "session_id": "s", "kind": "play"}));
        let mut ingestor = EventIngestor::new(
            &config(),
            log.client(),
            Arc::new(InMemoryCheckpointStore::new()),
            EngineMetrics::default(),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            ingestor.run(rx).await.map(|_| ingestor)
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let ingestor = handle.await.unwrap().unwrap();
        assert_eq!(ingestor.store().applied_offsets().get(&0), Some(&0));
        assert_eq!(log.committed().get(&0), Some(&0));
    }
}
