//! Window assignment
//!
//! Maps an event time onto every window of a [`WindowSpec`] that contains it.

use chrono::{DateTime, Utc};

use super::types::{millis_to_datetime, WindowBounds, WindowSpec};

/// Assigns event times to the windows of one spec
pub trait WindowAssigner: Send + Sync {
    /// Windows containing `timestamp`, oldest first
    fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<WindowBounds>;
}

impl WindowAssigner for WindowSpec {
    fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<WindowBounds> {
        window_starts(self, timestamp.timestamp_millis())
            .into_iter()
            .filter_map(|start| self.bounds_at(millis_to_datetime(start)))
            .collect()
    }
}

/// Start times (ms) of every window containing `ts`, ascending
///
/// Example, size 10 and slide 5: ts 7 gives starts [0, 5], ts 12 gives [5, 10].
fn window_starts(spec: &WindowSpec, ts: i64) -> Vec<i64> {
    let size = spec.size_ms as i64;
    let slide = spec.slide_ms as i64;
    let last_start = ts - ts.rem_euclid(slide);

    let mut starts = Vec::with_capacity(spec.windows_per_event());
    let mut start = last_start;
    while start > ts - size {
        starts.push(start);
        start -= slide;
    }
    starts.reverse();
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use playback_types::WindowType;

    fn at(ms: i64) -> DateTime<Utc> {
        millis_to_datetime(ms)
    }

    #[test]
    fn test_tumbling_assigns_single_window() {
        let spec = WindowSpec::tumbling(WindowType::Tumbling1m, 60_000);
        let windows = spec.assign_windows(at(90_500));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, at(60_000));
        assert_eq!(windows[0].end, at(120_000));
    }

    #[test]
    fn test_tumbling_boundary_belongs_to_next_window() {
        let spec = WindowSpec::tumbling(WindowType::Tumbling1m, 60_000);
        let windows = spec.assign_windows(at(120_000));
        assert_eq!(windows[0].start, at(120_000));
    }

    #[test]
    fn test_sliding_assigns_every_frame() {
        let spec = WindowSpec::sliding(WindowType::Sliding5m, 300_000, 60_000);
        let windows = spec.assign_windows(at(450_000));
        let starts: Vec<_> = windows.iter().map(|w| w.start.timestamp_millis()).collect();
        assert_eq!(starts, vec![180_000, 240_000, 300_000, 360_000, 420_000]);
        assert!(windows.iter().all(|w| w.contains(at(450_000))));
    }

    #[test]
    fn test_negative_timestamps_align_downwards() {
        let spec = WindowSpec::tumbling(WindowType::Tumbling1m, 60_000);
        let windows = spec.assign_windows(at(-1));
        assert_eq!(windows[0].start, at(-60_000));
        assert_eq!(windows[0].end, at(0));
    }
}
