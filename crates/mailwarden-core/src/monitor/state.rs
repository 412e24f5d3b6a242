//! Monitor lifecycle state and the poll checkpoint.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of one account monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorState {
    /// Accepted by the registry, first tick not yet begun.
    Starting,
    /// Between ticks, waiting out the poll interval.
    Running,
    /// Opening a session and pulling new messages.
    Fetching,
    /// Screening fetched messages.
    Classifying,
    /// Writing findings and pushing events.
    Persisting,
    /// The last tick failed; the monitor keeps polling.
    Error,
    /// Stop requested, draining the in-flight tick.
    Stopping,
    /// Terminal.
    Stopped,
}

impl MonitorState {
    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Persisting => "persisting",
            Self::Error => "error",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// High-water mark of processed mail.
///
/// The checkpoint, not the server's seen flags, decides what counts as
/// new: other clients marking mail read must not hide messages from the
/// monitor, and a re-polled message below the mark must not produce a
/// second finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest UID fully processed.
    pub last_uid: Option<u32>,
    /// Date of the newest processed message; the fallback cursor when the
    /// UID sequence cannot be trusted.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Ratchets both cursors forward. Never moves backwards.
    pub fn advance(&mut self, uid: u32, seen: DateTime<Utc>) {
        self.last_uid = Some(self.last_uid.map_or(uid, |prev| prev.max(uid)));
        self.last_seen = Some(self.last_seen.map_or(seen, |prev| prev.max(seen)));
    }
}

/// Point-in-time view of a monitor's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Current lifecycle phase.
    pub state: MonitorState,
    /// Where polling will resume.
    pub checkpoint: Checkpoint,
    /// Consecutive failed ticks; reset on the next success.
    pub error_count: u32,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Starting,
            checkpoint: Checkpoint::default(),
            error_count: 0,
        }
    }
}

/// Status shared between a monitor task and its registry handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusCell(Arc<Mutex<MonitorStatus>>);

impl StatusCell {
    pub(crate) fn snapshot(&self) -> MonitorStatus {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: MonitorState) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut MonitorStatus)) {
        apply(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod state_tests {
        use super::*;

        #[test]
        fn wire_strings() {
            let json = serde_json::to_string(&MonitorState::Fetching).unwrap();
            assert_eq!(json, "\"fetching\"");
            let back: MonitorState = serde_json::from_str("\"stopped\"").unwrap();
            assert_eq!(back, MonitorState::Stopped);
        }

        #[test]
        fn display_matches_as_str() {
            assert_eq!(MonitorState::Classifying.to_string(), "classifying");
        }
    }

    mod checkpoint_tests {
        use super::*;

        #[test]
        fn advance_from_empty() {
            let mut checkpoint = Checkpoint::default();
            let seen = Utc::now();
            checkpoint.advance(42, seen);
            assert_eq!(checkpoint.last_uid, Some(42));
            assert_eq!(checkpoint.last_seen, Some(seen));
        }

        #[test]
        fn advance_never_regresses() {
            let mut checkpoint = Checkpoint::default();
            let newer = Utc::now();
            let older = newer - chrono::Duration::hours(1);

            checkpoint.advance(42, newer);
            checkpoint.advance(10, older);

            assert_eq!(checkpoint.last_uid, Some(42));
            assert_eq!(checkpoint.last_seen, Some(newer));
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn cell_roundtrip() {
            let cell = StatusCell::default();
            assert_eq!(cell.snapshot().state, MonitorState::Starting);

            cell.set_state(MonitorState::Running);
            cell.update(|status| status.error_count += 1);

            let snapshot = cell.snapshot();
            assert_eq!(snapshot.state, MonitorState::Running);
            assert_eq!(snapshot.error_count, 1);
        }

        #[test]
        fn clones_share_state() {
            let cell = StatusCell::default();
            let other = cell.clone();
            other.set_state(MonitorState::Stopped);
            assert_eq!(cell.snapshot().state, MonitorState::Stopped);
        }
    }
}
