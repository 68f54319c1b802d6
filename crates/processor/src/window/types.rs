//! Window bounds and window specifications

use chrono::{DateTime, Duration, TimeZone, Utc};
use playback_types::WindowType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WindowError;

/// Earliest accepted event time, 0001-01-01T00:00:00Z
pub const MIN_EVENT_TIME_MS: i64 = -62_135_596_800_000;

/// Latest accepted event time, 9999-12-31T23:59:59.999Z
pub const MAX_EVENT_TIME_MS: i64 = 253_402_300_799_999;

/// Upper bound on any window size or slide (366 days)
pub const MAX_WINDOW_SIZE_MS: u64 = 366 * 24 * 3_600_000;

/// Represents the time bounds of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Start time of the window (inclusive)
    pub start: DateTime<Utc>,
    /// End time of the window (exclusive)
    pub end: DateTime<Utc>,
}

impl WindowBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {})",
            self.start.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.end.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

impl PartialOrd for WindowBounds {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowBounds {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

/// Size and slide of one window type
///
/// Tumbling windows have `slide_ms == size_ms`. Window starts are aligned to
/// multiples of the slide since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub window_type: WindowType,
    pub size_ms: u64,
    pub slide_ms: u64,
}

impl WindowSpec {
    pub fn tumbling(window_type: WindowType, size_ms: u64) -> Self {
        Self {
            window_type,
            size_ms,
            slide_ms: size_ms,
        }
    }

    pub fn sliding(window_type: WindowType, size_ms: u64, slide_ms: u64) -> Self {
        Self {
            window_type,
            size_ms,
            slide_ms,
        }
    }

    pub fn validate(&self) -> Result<(), WindowError> {
        if self.size_ms == 0 || self.size_ms > MAX_WINDOW_SIZE_MS {
            return Err(WindowError::InvalidWindowSize {
                window_type: self.window_type,
                size: self.size_ms,
            });
        }
        if self.slide_ms == 0 || self.slide_ms > self.size_ms {
            return Err(WindowError::InvalidSlideSize {
                slide: self.slide_ms,
                window: self.size_ms,
            });
        }
        Ok(())
    }

    /// Number of windows each event lands in
    pub fn windows_per_event(&self) -> usize {
        self.size_ms.div_ceil(self.slide_ms) as usize
    }

    /// Bounds of the window starting at `start`, `None` past the representable range
    pub fn bounds_at(&self, start: DateTime<Utc>) -> Option<WindowBounds> {
        let size = Duration::milliseconds(i64::try_from(self.size_ms).ok()?);
        start
            .checked_add_signed(size)
            .map(|end| WindowBounds::new(start, end))
    }
}

/// Milliseconds since epoch to a UTC timestamp, saturating at the
/// representable range.
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(if ms < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds_contains() {
        let start = millis_to_datetime(1_000);
        let end = millis_to_datetime(2_000);
        let bounds = WindowBounds::new(start, end);

        assert!(bounds.contains(millis_to_datetime(1_000)));
        assert!(bounds.contains(millis_to_datetime(1_999)));
        assert!(!bounds.contains(millis_to_datetime(2_000)));
        assert!(!bounds.contains(millis_to_datetime(999)));
    }

    #[test]
    fn test_spec_validation() {
        assert!(WindowSpec::tumbling(WindowType::Tumbling1m, 60_000).validate().is_ok());
        assert!(WindowSpec::tumbling(WindowType::Tumbling1m, 0).validate().is_err());
        assert!(WindowSpec::sliding(WindowType::Sliding5m, 300_000, 0).validate().is_err());
        assert!(WindowSpec::sliding(WindowType::Sliding5m, 300_000, 60_000).validate().is_ok());
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let spec = WindowSpec::tumbling(WindowType::Tumbling1h, MAX_WINDOW_SIZE_MS + 1);
        assert!(matches!(spec.validate(), Err(WindowError::InvalidWindowSize { .. })));
    }

    #[test]
    fn test_bounds_at_end_of_time() {
        let spec = WindowSpec::tumbling(WindowType::Tumbling1m, 60_000);
        assert!(spec.bounds_at(DateTime::<Utc>::MAX_UTC).is_none());

        let bounds = spec.bounds_at(millis_to_datetime(MAX_EVENT_TIME_MS)).unwrap();
        assert_eq!(bounds.end.timestamp_millis(), MAX_EVENT_TIME_MS + 60_000);
    }

    #[test]
    fn test_windows_per_event() {
        let sliding = WindowSpec::sliding(WindowType::Sliding5m, 300_000, 60_000);
        assert_eq!(sliding.windows_per_event(), 5);
        let tumbling = WindowSpec::tumbling(WindowType::Tumbling1h, 3_600_000);
        assert_eq!(tumbling.windows_per_event(), 1);
    }
}
