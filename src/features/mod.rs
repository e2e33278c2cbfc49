//! # Features Module
//!
//! Feature modules of the todo core.

pub mod reminders;
pub mod todos;

pub use reminders::{LogDispatcher, NotificationDispatcher, ReminderScheduler, ScheduledReminder};
pub use todos::{Todo, TodoStore};
