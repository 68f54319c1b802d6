//! CLI command implementations

pub mod checkpoint;
pub mod serve;

pub use checkpoint::CheckpointCommand;
pub use serve::ServeCommand;
