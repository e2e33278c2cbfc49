//! # Reminders Feature
//!
//! Durable one-shot reminder scheduling with crash recovery.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod dispatcher;
pub mod scheduler;

pub use dispatcher::{LogDispatcher, NotificationDispatcher};
pub use scheduler::{ReminderScheduler, ScheduledReminder};
