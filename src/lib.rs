// Core layer - configuration, error kinds, time source
pub mod core;

// Features layer - todo store and reminder scheduling
pub mod features;

// Infrastructure - SQLite persistence
pub mod database;

// Re-export core items
pub use self::core::{Clock, Config, Error, Result, SystemClock};

// Re-export infrastructure
pub use database::Database;

// Re-export feature items
pub use features::{
    // Reminders
    LogDispatcher, NotificationDispatcher, ReminderScheduler, ScheduledReminder,
    // Todos
    Todo, TodoStore,
};
