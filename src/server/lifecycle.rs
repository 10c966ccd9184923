use crate::error::{Error, Result};
use crate::server::{LogLine, ServerStatus};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const HISTORY_LIMIT: usize = 1000;
const STATUS_CHANNEL_CAPACITY: usize = 256;
const LOG_CHANNEL_CAPACITY: usize = 1024;

/// A definition's status moved from one value to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Server name
    pub name: String,
    /// Status before the change
    pub previous: ServerStatus,
    /// Status after the change
    pub current: ServerStatus,
    /// When the change was applied
    pub at: DateTime<Local>,
}

impl StatusChange {
    pub fn new(name: impl Into<String>, previous: ServerStatus, current: ServerStatus) -> Self {
        Self {
            name: name.into(),
            previous,
            current,
            at: Local::now(),
        }
    }
}

/// Fan-out of status changes and captured output lines.
///
/// Subscribers that fall behind lose the oldest messages (broadcast lag);
/// nothing blocks on a slow subscriber. The most recent status changes are
/// also kept in a bounded history.
#[derive(Clone)]
pub struct EventBus {
    status_tx: broadcast::Sender<StatusChange>,
    log_tx: broadcast::Sender<LogLine>,
    history: Arc<Mutex<VecDeque<StatusChange>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            status_tx,
            log_tx,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Record and broadcast a status change
    pub fn publish(&self, change: StatusChange) {
        tracing::debug!(
            server = %change.name,
            previous = %change.previous,
            current = %change.current,
            "Status changed"
        );

        match self.history.lock() {
            Ok(mut history) => {
                history.push_back(change.clone());
                while history.len() > HISTORY_LIMIT {
                    history.pop_front();
                }
            }
            Err(_) => tracing::warn!("Failed to lock status history"),
        }

        // No subscribers is fine.
        let _ = self.status_tx.send(change);
    }

    /// Broadcast a captured output line
    pub fn publish_log(&self, line: LogLine) {
        let _ = self.log_tx.send(line);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.log_tx.subscribe()
    }

    /// Recent status changes, newest first, optionally for one server.
    pub fn recent_changes(&self, name: Option<&str>, limit: Option<usize>) -> Result<Vec<StatusChange>> {
        let history = self
            .history
            .lock()
            .map_err(|_| Error::Other("Failed to lock status history".to_string()))?;

        let changes = history
            .iter()
            .rev()
            .filter(|c| name.is_none_or(|n| c.name == n))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(changes)
    }

    /// Clear the status history
    pub fn clear_history(&self) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| Error::Other("Failed to lock status history".to_string()))?;
        history.clear();
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("status_subscribers", &self.status_tx.receiver_count())
            .field("log_subscribers", &self.log_tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_and_history() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_status();

        bus.publish(StatusChange::new("a", ServerStatus::Stopped, ServerStatus::Starting));
        bus.publish(StatusChange::new("b", ServerStatus::Running, ServerStatus::Stopped));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(first.current, ServerStatus::Starting);

        let only_b = bus.recent_changes(Some("b"), None).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].previous, ServerStatus::Running);

        let newest = bus.recent_changes(None, Some(1)).unwrap();
        assert_eq!(newest[0].name, "b");
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::new();
        for _ in 0..HISTORY_LIMIT + 5 {
            bus.publish(StatusChange::new("a", ServerStatus::Stopped, ServerStatus::Running));
        }
        assert_eq!(bus.recent_changes(None, None).unwrap().len(), HISTORY_LIMIT);
        bus.clear_history().unwrap();
        assert!(bus.recent_changes(None, None).unwrap().is_empty());
    }
}
