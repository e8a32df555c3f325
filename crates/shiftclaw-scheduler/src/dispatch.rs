//! Notification dispatch: hands notifications to the delivery layer.
//! Delivery is best-effort: a failed send is logged and dropped.

use async_trait::async_trait;
use shiftclaw_core::Result;
use std::sync::Mutex;

use super::notify::{Notification, NotifyPriority};

/// Delivery seam implemented by the messaging layer.
#[async_trait]
pub trait NotifySink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log. Used when no chat transport is wired.
pub struct TracingSink;

#[async_trait]
impl NotifySink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let emoji = match notification.priority {
            NotifyPriority::Urgent => "🚨",
            NotifyPriority::High => "⚠️",
            NotifyPriority::Normal => "📢",
            NotifyPriority::Low => "ℹ️",
        };
        tracing::info!(
            group = notification.group.0,
            source = %notification.source,
            "{} {} {}",
            emoji,
            notification.title,
            notification.body
        );
        Ok(())
    }
}

/// Keeps delivered notifications in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn titles(&self) -> Vec<String> {
        self.delivered().into_iter().map(|n| n.title).collect()
    }
}

#[async_trait]
impl NotifySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut delivered = self
            .delivered
            .lock()
            .map_err(|e| shiftclaw_core::ShiftClawError::Notify(format!("Lock: {e}")))?;
        delivered.push(notification.clone());
        Ok(())
    }
}

/// Dispatch without propagating failure. Returns whether delivery succeeded.
pub async fn dispatch_best_effort(sink: &dyn NotifySink, notification: &Notification) -> bool {
    match sink.deliver(notification).await {
        Ok(()) => {
            tracing::debug!("✅ {} delivered '{}'", sink.name(), notification.title);
            true
        }
        Err(e) => {
            tracing::warn!(
                "⚠️ {} failed to deliver '{}' to group {}: {e}",
                sink.name(),
                notification.title,
                notification.group
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyRouter;
    use shiftclaw_core::{GroupId, ShiftClawError};

    struct FailingSink;

    #[async_trait]
    impl NotifySink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _notification: &Notification) -> Result<()> {
            Err(ShiftClawError::Notify("chat unreachable".into()))
        }
    }

    fn sample() -> Notification {
        NotifyRouter::create(
            GroupId(9),
            "greeting",
            serde_json::json!({"hello": true}),
            "test",
            NotifyPriority::Normal,
        )
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemorySink::new();
        assert!(dispatch_best_effort(&sink, &sample()).await);
        assert_eq!(sink.titles(), vec!["greeting".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        assert!(!dispatch_best_effort(&FailingSink, &sample()).await);
    }
}
