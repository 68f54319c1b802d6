//! Window types and aggregation keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// The fixed set of windows the engine maintains per content item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WindowType {
    #[serde(rename = "tumbling-1m")]
    Tumbling1m,
    #[serde(rename = "tumbling-1h")]
    Tumbling1h,
    #[serde(rename = "sliding-5m")]
    Sliding5m,
}

impl WindowType {
    pub const ALL: [WindowType; 3] = [
        WindowType::Tumbling1m,
        WindowType::Tumbling1h,
        WindowType::Sliding5m,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Tumbling1m => "tumbling-1m",
            WindowType::Tumbling1h => "tumbling-1h",
            WindowType::Sliding5m => "sliding-5m",
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, WindowType::Sliding5m)
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tumbling-1m" => Ok(WindowType::Tumbling1m),
            "tumbling-1h" => Ok(WindowType::Tumbling1h),
            "sliding-5m" => Ok(WindowType::Sliding5m),
            other => Err(TypesError::UnknownWindowType(other.to_string())),
        }
    }
}

/// Identity of one window accumulator
///
/// Ordering is content id, then window type, then window start, so all
/// windows of one content item and type form a contiguous range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub content_id: String,
    pub window_type: WindowType,
    pub window_start: DateTime<Utc>,
}

impl AggregationKey {
    pub fn new(
        content_id: impl Into<String>,
        window_type: WindowType,
        window_start: DateTime<Utc>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            window_type,
            window_start,
        }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.content_id,
            self.window_type,
            self.window_start.timestamp_millis()
        )
    }
}
