//! Crash, restore and replay: aggregates stay exactly-once visible

mod common;

use common::{config, config_with, open_stats, payload, record, MINUTE, T0};
use playback_types::{AccumulatorStats, WindowType};
use processor::{
    EngineMetrics, EventIngestor, InMemoryCheckpointStore, LogRecord, MemoryLog, MemoryLogClient,
    ProcessorConfig, Subscription, SubscriptionFilter,
};
use std::collections::BTreeMap;
use std::sync::Arc;

type ResultKey = (String, WindowType, i64);

fn ingestor(config: &ProcessorConfig, backend: Arc<InMemoryCheckpointStore>) -> EventIngestor<MemoryLogClient> {
    EventIngestor::new(config, MemoryLog::new().client(), backend, EngineMetrics::default()).unwrap()
}

/// Deterministic mix of sessions, kinds and slightly shuffled event times.
/// Every content item lives on one partition, as with key-based partitioning.
fn workload() -> Vec<LogRecord> {
    const KINDS: [&str; 7] = ["play", "buffer", "pause", "seek", "play", "complete", "error"];
    let mut seed: u64 = 42;
    let mut offsets = [0u64; 2];
    let mut positions: BTreeMap<String, u64> = BTreeMap::new();
    let mut records = Vec::new();

    for i in 0..120i64 {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let content_idx = (seed >> 33) % 4;
        let content = format!("c{content_idx}");
        let partition = (content_idx % 2) as u32;
        let session = format!("{content}-s{}", (seed >> 40) % 3);
        let kind = KINDS[((seed >> 20) % 7) as usize];
        let jitter = ((seed >> 50) % 15_000) as i64;
        let time = T0 + i * 9_000 - jitter;

        let position = positions.entry(session.clone()).or_insert(0);
        *position += if kind == "seek" { 20_000 } else { 5_000 };

        let offset = offsets[partition as usize];
        offsets[partition as usize] += 1;
        records.push(record(partition, offset, &content, &session, kind, time, *position));
    }
    records
}

fn workload_config() -> ProcessorConfig {
    let mut config = config();
    config.watermark.allowed_lateness_ms = 20_000;
    config.checkpoint.every_n_events = 10;
    config
}

fn drain(sub: &mut Subscription, results: &mut BTreeMap<ResultKey, AccumulatorStats>) {
    while let Ok(result) = sub.try_recv() {
        let key = (
            result.content_id.clone(),
            result.window_type,
            result.window_start.timestamp_millis(),
        );
        match results.get(&key) {
            // a window finalized again after a restart must carry the same totals
            Some(previous) => assert_eq!(previous, &result.stats, "re-emitted {key:?} differs"),
            None => {
                results.insert(key, result.stats.clone());
            }
        }
    }
}

struct RunOutcome {
    results: BTreeMap<ResultKey, AccumulatorStats>,
    open: BTreeMap<playback_types::AggregationKey, AccumulatorStats>,
    applied: BTreeMap<u32, u64>,
}

/// Feed the workload in fixed chunks, crashing after the listed chunk of
/// successive runs. Each restart restores the latest checkpoint and the log
/// redelivers everything from the beginning.
async fn run(records: &[LogRecord], crash_after: &[usize]) -> RunOutcome {
    let config = workload_config();
    let backend = Arc::new(InMemoryCheckpointStore::new());
    let chunks: Vec<Vec<LogRecord>> = records.chunks(7).map(|c| c.to_vec()).collect();
    let mut results = BTreeMap::new();
    let mut crashes = crash_after.iter().copied();

    loop {
        let mut ingestor = ingestor(&config, backend.clone());
        ingestor.recover().await.unwrap();
        let mut sub = ingestor.broker().subscribe(SubscriptionFilter::default()).unwrap();
        let crash_at = crashes.next();

        let mut crashed = false;
        for (idx, chunk) in chunks.iter().enumerate() {
            ingestor.process_batch(chunk.clone()).await.unwrap();
            drain(&mut sub, &mut results);
            if crash_at == Some(idx) {
                // let a running persist land so the next run sees a stable store
                ingestor.checkpoints_mut().wait_in_flight().await.unwrap();
                crashed = true;
                break;
            }
        }

        if !crashed {
            return RunOutcome {
                results,
                open: open_stats(ingestor.store()),
                applied: ingestor.store().applied_offsets(),
            };
        }
    }
}

#[tokio::test]
async fn test_crash_and_replay_matches_uninterrupted_run() {
    let records = workload();
    let baseline = run(&records, &[]).await;
    assert!(!baseline.results.is_empty());
    assert!(!baseline.open.is_empty());

    for crash_after in [vec![0], vec![2], vec![3, 9], vec![5, 5, 12], vec![16]] {
        let outcome = run(&records, &crash_after).await;
        assert_eq!(outcome.results, baseline.results, "results differ for crashes {crash_after:?}");
        assert_eq!(outcome.open, baseline.open, "open windows differ for crashes {crash_after:?}");
        assert_eq!(outcome.applied, baseline.applied);
    }
}

#[tokio::test]
async fn test_duplicate_pause_after_restart_is_not_double_counted() {
    let config = config_with(vec![WindowType::Tumbling1m]);
    let backend = Arc::new(InMemoryCheckpointStore::new());
    let play = record(0, 0, "show", "s1", "play", T0, 0);
    let pause = record(0, 1, "show", "s1", "pause", T0 + 30_000, 30_000);

    let mut first = ingestor(&config, backend.clone());
    first.process_batch(vec![play.clone(), pause.clone()]).await.unwrap();
    first.checkpoints_mut().checkpoint_now().await.unwrap();
    // crash: the checkpoint is durable but its offsets never reached the log
    drop(first);

    let mut second = ingestor(&config, backend.clone());
    let recovered = second.recover().await.unwrap().unwrap();
    assert_eq!(recovered.offsets.get(&0), Some(&1));
    let mut sub = second
        .broker()
        .subscribe(SubscriptionFilter::new(Some("show".into()), None))
        .unwrap();

    let report = second
        .process_batch(vec![
            play,
            pause,
            // the client also re-sent the pause under a new offset
            record(0, 2, "show", "s1", "pause", T0 + 30_000, 30_000),
            record(0, 3, "other", "s2", "play", T0 + MINUTE, 0),
        ])
        .await
        .unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.finalized, 1);

    let result = sub.try_recv().unwrap();
    assert_eq!(result.stats.total_watch_ms, 30_000);
}

#[tokio::test]
async fn test_restored_checkpoint_matches_live_state() {
    let records = workload();
    let (before, after) = records.split_at(63);
    let config = workload_config();
    let backend = Arc::new(InMemoryCheckpointStore::new());

    let mut live = ingestor(&config, backend.clone());
    for chunk in before.chunks(7) {
        live.process_batch(chunk.to_vec()).await.unwrap();
    }
    let persisted = live.checkpoints_mut().checkpoint_now().await.unwrap();
    let at_checkpoint = open_stats(live.store());
    assert_eq!(persisted.offsets, live.store().applied_offsets());

    for chunk in after.chunks(7) {
        live.process_batch(chunk.to_vec()).await.unwrap();
    }
    live.checkpoints_mut().wait_in_flight().await.unwrap();

    // restore checkpoint `persisted.seq` specifically, not whatever came later
    let pinned = Arc::new(InMemoryCheckpointStore::new());
    let checkpoint = {
        use processor::CheckpointStore;
        backend.load(persisted.seq).await.unwrap()
    };
    pinned.put_raw(checkpoint.seq(), checkpoint.encode().unwrap());

    let mut restored = ingestor(&config, pinned);
    restored.recover().await.unwrap().unwrap();
    assert_eq!(open_stats(restored.store()), at_checkpoint);

    for chunk in after.chunks(7) {
        restored.process_batch(chunk.to_vec()).await.unwrap();
    }
    assert_eq!(open_stats(restored.store()), open_stats(live.store()));
    assert_eq!(restored.store().applied_offsets(), live.store().applied_offsets());
}

#[tokio::test]
async fn test_offsets_committed_only_after_persistence() {
    let mut config = config();
    config.checkpoint.every_n_events = 2;
    let log = MemoryLog::new();
    log.append(0, payload("show", "s1", "play", T0, 0));
    log.append(0, payload("show", "s1", "pause", T0 + 10_000, 10_000));

    let backend = Arc::new(InMemoryCheckpointStore::new());
    let mut ingestor =
        EventIngestor::new(&config, log.client(), backend.clone(), EngineMetrics::default()).unwrap();

    let report = ingestor.poll_once().await.unwrap();
    assert_eq!(report.checkpoint_started, Some(1));
    assert_eq!(report.committed, None);
    assert!(log.committed().is_empty());

    let mut committed = None;
    for _ in 0..200 {
        let report = ingestor.process_batch(Vec::new()).await.unwrap();
        if report.committed.is_some() {
            committed = report.committed;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(committed, Some(BTreeMap::from([(0, 1)])));
    assert_eq!(backend.len(), 1);
    assert_eq!(log.committed().get(&0), Some(&1));
}

#[tokio::test]
async fn test_restart_resumes_after_committed_records() {
    let config = config();
    let log = MemoryLog::new();
    let backend = Arc::new(InMemoryCheckpointStore::new());
    log.append(0, payload("show", "s1", "play", T0, 0));
    log.append(1, payload("film", "s2", "play", T0, 0));

    let mut first = EventIngestor::new(&config, log.client(), backend.clone(), EngineMetrics::default()).unwrap();
    first.poll_once().await.unwrap();
    first.shutdown().await.unwrap();
    assert_eq!(log.committed(), BTreeMap::from([(0, 0), (1, 0)]));

    log.append(0, payload("show", "s1", "pause", T0 + 5_000, 5_000));
    let mut second = EventIngestor::new(&config, log.client(), backend, EngineMetrics::default()).unwrap();
    second.recover().await.unwrap().unwrap();
    let report = second.poll_once().await.unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.replayed, 0);
    assert_eq!(report.applied, 1);

    let view = second.query().query("show", WindowType::Tumbling1m).unwrap();
    assert_eq!(view.stats.total_watch_ms, 5_000);
}
