//! Notification model: what the core decides to tell a group, and when.
//! Rendering and delivery belong to the messaging layer.

use serde::{Deserialize, Serialize};
use shiftclaw_core::GroupId;

/// A notification addressed to a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Target group.
    pub group: GroupId,
    /// Short machine-readable title, e.g. "break_overdue".
    pub title: String,
    /// Structured payload for the renderer.
    pub body: serde_json::Value,
    /// Priority: low, normal, high, urgent.
    pub priority: NotifyPriority,
    /// Source (which task/event triggered this).
    pub source: String,
    /// Timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Keeps a bounded history of produced notifications.
pub struct NotifyRouter {
    /// Notification history (in-memory ring buffer, max 100).
    history: Vec<Notification>,
}

impl NotifyRouter {
    pub const HISTORY_LIMIT: usize = 100;

    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Record a produced notification in history.
    pub fn record(&mut self, notification: Notification) {
        self.history.push(notification);
        // Ring buffer: keep last 100
        if self.history.len() > Self::HISTORY_LIMIT {
            self.history.remove(0);
        }
    }

    /// Get notification history.
    pub fn history(&self) -> &[Notification] {
        &self.history
    }

    /// Create a notification.
    pub fn create(
        group: GroupId,
        title: &str,
        body: serde_json::Value,
        source: &str,
        priority: NotifyPriority,
    ) -> Notification {
        Notification {
            group,
            title: title.to_string(),
            body,
            priority,
            source: source.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut router = NotifyRouter::new();
        for i in 0..105 {
            router.record(NotifyRouter::create(
                GroupId(1),
                &format!("n{i}"),
                serde_json::Value::Null,
                "test",
                NotifyPriority::Low,
            ));
        }
        assert_eq!(router.history().len(), NotifyRouter::HISTORY_LIMIT);
        assert_eq!(router.history()[0].title, "n5");
    }
}
