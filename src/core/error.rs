//! Crate-level error kinds.
//!
//! `InvalidInput` and `NotFound` are recoverable caller mistakes. `Storage`
//! wraps an underlying SQLite failure and is always surfaced to the caller
//! rather than swallowed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied unusable input, e.g. an empty todo title.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A mutation referenced a todo id that does not exist.
    #[error("todo {0} not found")]
    NotFound(i64),

    /// The underlying database failed.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
