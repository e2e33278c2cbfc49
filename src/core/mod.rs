//! # Core Module
//!
//! Configuration, error kinds, and the time source abstraction shared by
//! the rest of the crate.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod config;
pub mod error;
pub mod time;

// Re-export commonly used items
pub use config::Config;
pub use error::{Error, Result};
pub use time::{Clock, SystemClock};
