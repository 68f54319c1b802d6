//! Playback aggregation
//!
//! [`SessionCursor`] turns successive events of one session into watch-time
//! deltas and start/complete/error flags. [`Accumulator`] folds those into
//! per-window counters. [`WindowAggregator`] routes each event to every window
//! covering it and finalizes windows as watermarks pass.

pub mod accumulator;
pub mod aggregator;
pub mod session;

pub use accumulator::Accumulator;
pub use aggregator::{ApplyOutcome, WindowAggregator};
pub use session::{SessionContribution, SessionCursor};
