//! Checkpoint format and durable checkpoint stores
//!
//! A checkpoint is an immutable record of one state snapshot together with
//! the log offsets it reflects. Files are written to a temporary name, synced
//! and renamed into place, so a crash never leaves a torn checkpoint behind
//! the final name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::store::StateSnapshot;
use crate::error::{CheckpointError, CheckpointResult};

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const CHECKPOINT_SUFFIX: &str = ".ckpt";
const TEMP_SUFFIX: &str = ".tmp";
const FORMAT_VERSION: u32 = 1;

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Monotonically increasing sequence number
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    /// Last applied offset per partition captured by the snapshot
    pub partition_offsets: BTreeMap<u32, u64>,
    pub accumulator_count: usize,
    pub size_bytes: u64,
    /// SHA-256 of the snapshot bytes, hex encoded
    pub checksum: String,
    pub version: u32,
}

/// A checkpoint containing an encoded snapshot and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub snapshot_bytes: Vec<u8>,
}

impl Checkpoint {
    pub fn from_snapshot(seq: u64, snapshot: &StateSnapshot) -> CheckpointResult<Self> {
        let snapshot_bytes = snapshot.encode().map_err(|e| CheckpointError::Encoding {
            reason: e.to_string(),
        })?;
        let checksum = Self::calculate_checksum(&snapshot_bytes);

        Ok(Self {
            metadata: CheckpointMetadata {
                seq,
                created_at: snapshot.taken_at,
                partition_offsets: snapshot.applied_offsets.clone(),
                accumulator_count: snapshot.accumulator_count(),
                size_bytes: snapshot_bytes.len() as u64,
                checksum,
                version: FORMAT_VERSION,
            },
            snapshot_bytes,
        })
    }

    pub fn seq(&self) -> u64 {
        self.metadata.seq
    }

    /// Calculate SHA-256 checksum of the snapshot bytes
    pub fn calculate_checksum(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    /// Validate the checkpoint's integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.metadata.version != FORMAT_VERSION {
            return Err(format!(
                "unsupported checkpoint version {}",
                self.metadata.version
            ));
        }
        let calculated = Self::calculate_checksum(&self.snapshot_bytes);
        if calculated != self.metadata.checksum {
            return Err(format!(
                "checksum mismatch: expected {}, got {}",
                self.metadata.checksum, calculated
            ));
        }
        Ok(())
    }

    /// Decode the contained snapshot
    pub fn snapshot(&self, location: &str) -> CheckpointResult<StateSnapshot> {
        StateSnapshot::decode(&self.snapshot_bytes).map_err(|e| CheckpointError::RestoreCorruption {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn encode(&self) -> CheckpointResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CheckpointError::Encoding {
            reason: e.to_string(),
        })
    }

    /// Decode and validate a stored checkpoint
    pub fn decode(bytes: &[u8], location: &str) -> CheckpointResult<Self> {
        let checkpoint: Checkpoint =
            bincode::deserialize(bytes).map_err(|e| CheckpointError::RestoreCorruption {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        checkpoint
            .validate()
            .map_err(|reason| CheckpointError::RestoreCorruption {
                location: location.to_string(),
                reason,
            })?;
        Ok(checkpoint)
    }
}

/// Durable home for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a checkpoint durably; an `Err` means nothing was published
    async fn persist(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;

    /// Sequence numbers of stored checkpoints, ascending
    async fn list_sequences(&self) -> CheckpointResult<Vec<u64>>;

    /// Load and validate one checkpoint
    async fn load(&self, seq: u64) -> CheckpointResult<Checkpoint>;

    /// Human-readable location, for logs
    fn location(&self) -> String;

    /// The checkpoint with the highest sequence number
    ///
    /// A corrupt latest checkpoint is an error; older ones are never used in
    /// its place.
    async fn load_latest(&self) -> CheckpointResult<Option<Checkpoint>> {
        match self.list_sequences().await?.last() {
            Some(seq) => self.load(*seq).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Checkpoints as files in a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
    retention: usize,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            directory: directory.into(),
            retention: retention.max(1),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, seq: u64) -> PathBuf {
        self.directory
            .join(format!("{CHECKPOINT_PREFIX}{seq:020}{CHECKPOINT_SUFFIX}"))
    }

    fn parse_seq(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(CHECKPOINT_PREFIX)?
            .strip_suffix(CHECKPOINT_SUFFIX)?
            .parse()
            .ok()
    }

    async fn sync_directory(&self) {
        // Directory fsync makes the rename durable; not every platform allows it.
        match tokio::fs::File::open(&self.directory).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(error = %e, "Directory sync not supported");
                }
            }
            Err(e) => debug!(error = %e, "Could not open checkpoint directory for sync"),
        }
    }

    /// Remove checkpoints beyond the retention count, oldest first
    async fn cleanup_old_checkpoints(&self) -> CheckpointResult<usize> {
        let seqs = self.list_sequences().await?;
        if seqs.len() <= self.retention {
            return Ok(0);
        }
        let excess = seqs.len() - self.retention;
        let mut removed = 0;
        for seq in &seqs[..excess] {
            let path = self.path_for(*seq);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(seq = seq, "Removed old checkpoint");
                    removed += 1;
                }
                Err(e) => warn!(seq = seq, error = %e, "Failed to remove old checkpoint"),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn persist(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let seq = checkpoint.seq();
        let bytes = checkpoint.encode()?;
        let final_path = self.path_for(seq);
        let temp_path = final_path.with_extension(format!("ckpt{TEMP_SUFFIX}"));

        tokio::fs::create_dir_all(&self.directory).await?;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        self.sync_directory().await;

        info!(
            seq = seq,
            bytes = bytes.len(),
            accumulators = checkpoint.metadata.accumulator_count,
            path = %final_path.display(),
            "Checkpoint saved"
        );

        // the checkpoint is already published; pruning failures must not undo that
        if let Err(e) = self.cleanup_old_checkpoints().await {
            warn!(seq = seq, error = %e, "Checkpoint retention cleanup failed");
        }
        Ok(())
    }

    async fn list_sequences(&self) -> CheckpointResult<Vec<u64>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut seqs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = entry.file_name().to_str().and_then(Self::parse_seq) {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    async fn load(&self, seq: u64) -> CheckpointResult<Checkpoint> {
        let path = self.path_for(seq);
        let location = path.display().to_string();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CheckpointError::RestoreCorruption {
                location: location.clone(),
                reason: format!("failed to read file: {e}"),
            })?;
        let checkpoint = Checkpoint::decode(&bytes, &location)?;
        if checkpoint.seq() != seq {
            return Err(CheckpointError::RestoreCorruption {
                location,
                reason: format!("file name says seq {seq}, contents say {}", checkpoint.seq()),
            });
        }
        Ok(checkpoint)
    }

    fn location(&self) -> String {
        self.directory.display().to_string()
    }
}

/// Checkpoints held in memory, encoded exactly as on disk
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<u64, Vec<u8>>>,
    retention: Option<usize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            checkpoints: Mutex::new(BTreeMap::new()),
            retention: Some(retention.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the stored bytes of a checkpoint
    pub fn put_raw(&self, seq: u64, bytes: Vec<u8>) {
        self.checkpoints.lock().insert(seq, bytes);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn persist(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let bytes = checkpoint.encode()?;
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.insert(checkpoint.seq(), bytes);
        if let Some(retention) = self.retention {
            while checkpoints.len() > retention {
                checkpoints.pop_first();
            }
        }
        Ok(())
    }

    async fn list_sequences(&self) -> CheckpointResult<Vec<u64>> {
        Ok(self.checkpoints.lock().keys().copied().collect())
    }

    async fn load(&self, seq: u64) -> CheckpointResult<Checkpoint> {
        let location = format!("memory:{seq}");
        let bytes = self
            .checkpoints
            .lock()
            .get(&seq)
            .cloned()
            .ok_or_else(|| CheckpointError::RestoreCorruption {
                location: location.clone(),
                reason: "checkpoint not found".to_string(),
            })?;
        Checkpoint::decode(&bytes, &location)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatermarkConfig;
    use crate::state::StateStore;

    fn snapshot_with_offsets(offsets: &[(u32, u64)]) -> StateSnapshot {
        let store = StateStore::new(&WatermarkConfig::default());
        for (partition, offset) in offsets {
            store.write().mark_applied(*partition, *offset);
        }
        store.snapshot()
    }

    #[test]
    fn test_checkpoint_carries_snapshot_offsets() {
        let snapshot = snapshot_with_offsets(&[(0, 10), (1, 3)]);
        let checkpoint = Checkpoint::from_snapshot(4, &snapshot).unwrap();
        assert_eq!(checkpoint.seq(), 4);
        assert_eq!(checkpoint.metadata.partition_offsets, snapshot.applied_offsets);
        assert!(checkpoint.validate().is_ok());
        assert_eq!(checkpoint.snapshot("test").unwrap(), snapshot);
    }

    #[test]
    fn test_tampered_checkpoint_fails_validation() {
        let snapshot = snapshot_with_offsets(&[(0, 1)]);
        let mut checkpoint = Checkpoint::from_snapshot(1, &snapshot).unwrap();
        checkpoint.snapshot_bytes.push(0);
        assert!(checkpoint.validate().unwrap_err().contains("checksum mismatch"));
    }

    #[test]
    fn test_decode_garbage_is_restore_corruption() {
        let err = Checkpoint::decode(b"\x01\x02garbage", "somewhere").unwrap_err();
        assert!(matches!(err, CheckpointError::RestoreCorruption { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_file_names_sort_by_seq() {
        let store = FileCheckpointStore::new("/tmp/x", 3);
        let name = store.path_for(42);
        let file_name = name.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name, "checkpoint-00000000000000000042.ckpt");
        assert_eq!(FileCheckpointStore::parse_seq(file_name), Some(42));
        assert_eq!(FileCheckpointStore::parse_seq("checkpoint-1.ckpt.tmp"), None);
    }

    #[tokio::test]
    async fn test_file_store_persist_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 10);

        for seq in 1..=3 {
            let snapshot = snapshot_with_offsets(&[(0, seq * 10)]);
            store
                .persist(&Checkpoint::from_snapshot(seq, &snapshot).unwrap())
                .await
                .unwrap();
        }

        let latest = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.seq(), 3);
        assert_eq!(latest.metadata.partition_offsets.get(&0), Some(&30));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 2);
        for seq in 1..=5 {
            let snapshot = snapshot_with_offsets(&[(0, seq)]);
            store
                .persist(&Checkpoint::from_snapshot(seq, &snapshot).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(store.list_sequences().await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_empty_directory_has_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("missing"), 2);
        assert!(store.load_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stray_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 2);
        let snapshot = snapshot_with_offsets(&[(0, 1)]);
        store
            .persist(&Checkpoint::from_snapshot(1, &snapshot).unwrap())
            .await
            .unwrap();
        std::fs::write(
            dir.path().join("checkpoint-00000000000000000002.ckpt.tmp"),
            b"half written",
        )
        .unwrap();

        assert_eq!(store.load_latest().await.unwrap().unwrap().seq(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_latest_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 5);
        let snapshot = snapshot_with_offsets(&[(0, 1)]);
        store
            .persist(&Checkpoint::from_snapshot(1, &snapshot).unwrap())
            .await
            .unwrap();
        std::fs::write(store.path_for(2), b"garbage").unwrap();

        let err = store.load_latest().await.unwrap_err();
        assert!(matches!(err, CheckpointError::RestoreCorruption { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_store_retention() {
        let store = InMemoryCheckpointStore::with_retention(2);
        for seq in 0..4 {
            let snapshot = snapshot_with_offsets(&[(1, seq)]);
            store
                .persist(&Checkpoint::from_snapshot(seq, &snapshot).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(store.list_sequences().await.unwrap(), vec![2, 3]);
        assert_eq!(store.load_latest().await.unwrap().unwrap().seq(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retention_cleanup_failure_keeps_checkpoint_published() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 1);
        store
            .persist(&Checkpoint::from_snapshot(1, &snapshot_with_offsets(&[(0, 1)])).unwrap())
            .await
            .unwrap();

        // write+search but no read: files can be created and renamed, listing fails
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o300)).unwrap();
        if std::fs::read_dir(dir.path()).is_ok() {
            // privileged user, listing cannot be made to fail
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = store
            .persist(&Checkpoint::from_snapshot(2, &snapshot_with_offsets(&[(0, 2)])).unwrap())
            .await;
        let published = store.path_for(2).exists();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(result.is_ok(), "persist failed after publishing: {result:?}");
        assert!(published);
        assert_eq!(store.load_latest().await.unwrap().unwrap().seq(), 2);
    }
}
