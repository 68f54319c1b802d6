//! Per-session playhead tracking
//!
//! Watch time is derived from successive playhead positions of one session,
//! independent of which window an event falls in.

use playback_types::PlaybackKind;
use serde::{Deserialize, Serialize};

/// What one event adds to the windows it covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionContribution {
    pub watch_ms: u64,
    pub started: bool,
    pub completed: bool,
    pub errored: bool,
}

/// Playhead state of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    /// Furthest position reached since the last seek
    last_position_ms: Option<u64>,
    /// A play has been seen and no completion since
    in_playthrough: bool,
    /// Latest event time seen for the session
    last_event_time_ms: i64,
}

impl SessionCursor {
    /// Advance the cursor with one event
    ///
    /// A seek moves the playhead without adding watch time. Every other kind
    /// adds the forward distance travelled by the playhead; regressions add
    /// nothing and do not move the cursor back.
    pub fn advance(&mut self, kind: PlaybackKind, position_ms: u64, event_time_ms: i64) -> SessionContribution {
        let mut contribution = SessionContribution::default();
        self.last_event_time_ms = self.last_event_time_ms.max(event_time_ms);

        if kind == PlaybackKind::Seek {
            self.last_position_ms = Some(position_ms);
            return contribution;
        }

        contribution.watch_ms = match self.last_position_ms {
            Some(last) => position_ms.saturating_sub(last),
            None => 0,
        };
        self.last_position_ms = Some(self.last_position_ms.map_or(position_ms, |last| last.max(position_ms)));

        match kind {
            PlaybackKind::Play => {
                contribution.started = !self.in_playthrough;
                self.in_playthrough = true;
            }
            PlaybackKind::Complete => {
                contribution.completed = true;
                self.in_playthrough = false;
            }
            PlaybackKind::Error => contribution.errored = true,
            PlaybackKind::Pause | PlaybackKind::Buffer | PlaybackKind::Seek => {}
        }
        contribution
    }

    pub fn last_event_time_ms(&self) -> i64 {
        self.last_event_time_ms
    }
}
