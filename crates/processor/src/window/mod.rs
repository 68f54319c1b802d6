//! Windowing for playback aggregation
//!
//! Three window types are maintained per content item:
//!
//! ```text
//! tumbling-1m:  [--1m--][--1m--][--1m--]
//! tumbling-1h:  [-----------1h-----------]
//! sliding-5m:   [------5m------]
//!                  [------5m------]        one frame per minute
//! ```
//!
//! Sizes come from [`crate::config::WindowConfig`]; a window covers
//! `[start, start + size)`.

pub mod assigner;
pub mod types;

pub use assigner::WindowAssigner;
pub use types::{WindowBounds, WindowSpec, MAX_EVENT_TIME_MS, MAX_WINDOW_SIZE_MS, MIN_EVENT_TIME_MS};
pub(crate) use types::millis_to_datetime;
