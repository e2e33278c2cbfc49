//! Notification delivery boundary.
//!
//! The scheduler hands due reminders to a `NotificationDispatcher`;
//! rendering an actual system notification is the collaborator's job.
//! Delivery is best-effort and never retried.

use anyhow::Result;
use async_trait::async_trait;
use log::info;

/// Receives "fire reminder" events from the scheduler.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn fire(&self, todo_id: i64, title: &str) -> Result<()>;
}

/// Dispatcher that surfaces reminders through the log output.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn fire(&self, todo_id: i64, title: &str) -> Result<()> {
        info!("Reminder for todo {}: Don't forget: {}", todo_id, title);
        Ok(())
    }
}
