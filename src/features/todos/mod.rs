//! # Todos Feature
//!
//! Persistent todo list with a push-based live query.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod store;

pub use store::{Todo, TodoStore};
