//! State management for the playback engine
//!
//! - [`StateStore`]: the single owned store of accumulators, session cursors,
//!   watermarks and applied offsets, with atomic snapshot and restore.
//! - [`Checkpoint`] and [`CheckpointStore`]: the durable checkpoint format and
//!   where it lives ([`FileCheckpointStore`], [`InMemoryCheckpointStore`]).
//! - [`CheckpointManager`]: decides when to checkpoint, persists in the
//!   background with retries, and restores at startup.
//!
//! ```rust,no_run
//! use processor::config::{CheckpointConfig, WatermarkConfig};
//! use processor::metrics::EngineMetrics;
//! use processor::state::{CheckpointManager, FileCheckpointStore, StateStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = StateStore::new(&WatermarkConfig::default());
//!     let files = Arc::new(FileCheckpointStore::new("/var/lib/playback/checkpoints", 5));
//!     let mut manager = CheckpointManager::new(
//!         store.clone(),
//!         files,
//!         CheckpointConfig::default(),
//!         EngineMetrics::default(),
//!     );
//!
//!     if let Some(recovered) = manager.recover().await? {
//!         println!("resumed from checkpoint {}", recovered.seq);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod manager;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use manager::{
    CheckpointManager, CheckpointPhase, CheckpointStats, PersistedCheckpoint, RecoveredCheckpoint,
};
pub use store::{ClosedWindowEntry, ClosedWindows, StateSnapshot, StateStore, StoreState};
