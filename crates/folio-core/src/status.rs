//! Save status state machine
//!
//! ```text
//! Idle ──► Saving ──► Success ──► Idle
//!            │  └───► Error ────► Idle
//!            └──────► Idle          (nothing to save)
//! ```
//!
//! The current status is published on a `watch` channel so observers always
//! see the latest value.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Status of the session's save activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    /// No save running
    #[default]
    Idle,
    /// Pipeline in progress
    Saving,
    /// Last save succeeded (shown briefly)
    Success,
    /// Last save failed (shown briefly)
    Error,
}

impl SaveStatus {
    /// Whether this is a short-lived terminal display state
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Attempted transition not in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct IllegalTransition {
    /// Status before
    pub from: SaveStatus,
    /// Rejected target
    pub to: SaveStatus,
}

/// Statuses reachable from `from`
#[must_use]
pub fn allowed_transitions(from: SaveStatus) -> &'static [SaveStatus] {
    use SaveStatus::{Error, Idle, Saving, Success};
    match from {
        Idle => &[Saving],
        Saving => &[Success, Error, Idle],
        Success | Error => &[Idle],
    }
}

/// Validate a status transition
pub fn validate_transition(from: SaveStatus, to: SaveStatus) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// Status holder publishing every change
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<SaveStatus>,
}

impl StatusCell {
    /// Create cell in `Idle`
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SaveStatus::Idle);
        Self { tx }
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn get(&self) -> SaveStatus {
        *self.tx.borrow()
    }

    /// Observe status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.tx.subscribe()
    }

    /// Move to `to` if the table allows it
    pub fn transition(&self, to: SaveStatus) -> Result<(), IllegalTransition> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| match validate_transition(*current, to) {
            Ok(()) => {
                *current = to;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        if let Err(e) = outcome {
            tracing::error!(from = %e.from, to = %e.to, "illegal status transition");
        }
        outcome
    }

    /// Move `expected` to `Idle`; no-op if the status moved on meanwhile
    pub fn revert(&self, expected: SaveStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == expected && expected.is_terminal() {
                *current = SaveStatus::Idle;
                true
            } else {
                false
            }
        })
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let cell = StatusCell::new();
        cell.transition(SaveStatus::Saving).unwrap();
        cell.transition(SaveStatus::Success).unwrap();
        assert!(cell.revert(SaveStatus::Success));
        assert_eq!(cell.get(), SaveStatus::Idle);
    }

    #[test]
    fn rejects_skipping_saving() {
        let cell = StatusCell::new();
        let err = cell.transition(SaveStatus::Success).unwrap_err();
        assert_eq!(err, IllegalTransition { from: SaveStatus::Idle, to: SaveStatus::Success });
        assert_eq!(cell.get(), SaveStatus::Idle);
    }

    #[test]
    fn revert_ignores_stale_status() {
        let cell = StatusCell::new();
        cell.transition(SaveStatus::Saving).unwrap();
        assert!(!cell.revert(SaveStatus::Error));
        assert_eq!(cell.get(), SaveStatus::Saving);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let cell = StatusCell::new();
        let mut rx = cell.subscribe();
        cell.transition(SaveStatus::Saving).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SaveStatus::Saving);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SaveStatus::Saving).unwrap(), "\"saving\"");
    }
}
