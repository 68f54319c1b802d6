//! Core types for the playback analytics engine
//!
//! This crate holds the data model shared between the processor, the HTTP
//! surface and the command line: decoded playback events, window types and
//! aggregation keys, and the results produced for queries and subscribers.

pub mod errors;
pub mod events;
pub mod metrics;
pub mod windows;

pub use errors::{Result, TypesError};
pub use events::{PlaybackEvent, PlaybackKind};
pub use metrics::{AccumulatorStats, AccumulatorView, PlaybackStatistics, WindowResult};
pub use windows::{AggregationKey, WindowType};
