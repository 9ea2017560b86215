//! Notification delivery.
//!
//! The engine treats both calls as fire-and-forget: an `Err` is logged and
//! the reminder's state is not affected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::NotifyError;
use crate::reminder::Reminder;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// The reminder's due time has been reached while the engine was running.
    async fn notify_due(&self, reminder: &Reminder) -> Result<(), NotifyError>;

    /// The reminder came due while nothing was watching it.
    async fn notify_overdue(&self, reminder: &Reminder) -> Result<(), NotifyError>;
}

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify_due(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        info!(id = reminder.id, due_at = %reminder.due_at, "reminder due: {}", reminder.title);
        Ok(())
    }

    async fn notify_overdue(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        info!(id = reminder.id, due_at = %reminder.due_at, "reminder overdue: {}", reminder.title);
        Ok(())
    }
}

/// An alert as delivered through [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Due { reminder: Reminder },
    Overdue { reminder: Reminder },
}

impl Notification {
    pub fn reminder(&self) -> &Reminder {
        match self {
            Notification::Due { reminder } | Notification::Overdue { reminder } => reminder,
        }
    }
}

/// Forwards alerts to an unbounded channel, for hosts that render them
/// themselves.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx.send(notification).map_err(|_| NotifyError::Closed)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify_due(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        self.send(Notification::Due {
            reminder: reminder.clone(),
        })
    }

    async fn notify_overdue(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        self.send(Notification::Overdue {
            reminder: reminder.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::NewReminder;
    use chrono::Utc;

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let reminder = NewReminder::once("Pay rent", Utc::now()).into_reminder(3);

        sink.notify_overdue(&reminder).await.unwrap();
        sink.notify_due(&reminder).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Notification::Overdue { .. })));
        let due = rx.recv().await.unwrap();
        assert!(matches!(due, Notification::Due { .. }));
        assert_eq!(due.reminder().id, 3);
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let reminder = NewReminder::once("Gone", Utc::now()).into_reminder(1);
        assert!(matches!(
            sink.notify_due(&reminder).await,
            Err(NotifyError::Closed)
        ));
    }
}
