//! Push delivery of monitor events.
//!
//! Consumers register one channel per account; monitors push into the hub
//! and never wait. An event with nobody listening is dropped after a debug
//! log, so delivery problems cannot slow polling down.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::account::AccountId;
use crate::findings::Finding;
use crate::monitor::MonitorState;

/// Something a monitor wants the outside world to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorEvent {
    /// A violation was detected and persisted.
    Violation {
        /// The stored finding, ID populated.
        finding: Finding,
    },
    /// A tick failed.
    Error {
        /// Account whose tick failed.
        account_id: AccountId,
        /// Human-readable cause.
        message: String,
    },
    /// The monitor crossed a lifecycle edge.
    Status {
        /// Account the monitor watches.
        account_id: AccountId,
        /// The state it arrived in.
        state: MonitorState,
    },
}

/// Routes [`MonitorEvent`]s to per-account channels.
#[derive(Default)]
pub struct NotificationHub {
    channels: RwLock<HashMap<AccountId, UnboundedSender<MonitorEvent>>>,
}

impl NotificationHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the delivery channel for an account, replacing any
    /// previous one.
    pub fn register(&self, account_id: AccountId, sender: UnboundedSender<MonitorEvent>) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id, sender);
    }

    /// Removes the delivery channel for an account. Idempotent.
    pub fn unregister(&self, account_id: AccountId) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&account_id);
    }

    /// Delivers an event without blocking. Fire-and-forget: an absent or
    /// closed channel drops the event.
    pub fn push(&self, account_id: AccountId, event: MonitorEvent) {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        match channels.get(&account_id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!("dropping event for account {account_id}: channel closed");
                }
            }
            None => {
                debug!("dropping event for account {account_id}: no channel registered");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_push_reaches_registered_channel() {
        let hub = NotificationHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(AccountId::new(1), tx);

        hub.push(
            AccountId::new(1),
            MonitorEvent::Status {
                account_id: AccountId::new(1),
                state: MonitorState::Running,
            },
        );

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            MonitorEvent::Status {
                state: MonitorState::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_push_without_listener_is_dropped() {
        let hub = NotificationHub::new();
        hub.push(
            AccountId::new(9),
            MonitorEvent::Error {
                account_id: AccountId::new(9),
                message: "nothing listening".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn test_push_to_closed_channel_is_dropped() {
        let hub = NotificationHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(AccountId::new(1), tx);
        drop(rx);

        hub.push(
            AccountId::new(1),
            MonitorEvent::Status {
                account_id: AccountId::new(1),
                state: MonitorState::Stopped,
            },
        );
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = NotificationHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(AccountId::new(1), tx);

        hub.unregister(AccountId::new(1));
        hub.unregister(AccountId::new(1));

        hub.push(
            AccountId::new(1),
            MonitorEvent::Status {
                account_id: AccountId::new(1),
                state: MonitorState::Stopped,
            },
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_previous_channel() {
        let hub = NotificationHub::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        hub.register(AccountId::new(1), old_tx);
        hub.register(AccountId::new(1), new_tx);

        hub.push(
            AccountId::new(1),
            MonitorEvent::Status {
                account_id: AccountId::new(1),
                state: MonitorState::Running,
            },
        );

        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.recv().await.is_some());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = MonitorEvent::Error {
            account_id: AccountId::new(3),
            message: "authentication failed".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "authentication failed");

        let status = MonitorEvent::Status {
            account_id: AccountId::new(3),
            state: MonitorState::Stopped,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "stopped");
    }
}
