//! Persistence layer for guardian
//!
//! Provides:
//! - Audit log (append-only)
//! - Policy snapshot, restored on restart
//! - Agent profile and local PIN
//! - Controller-side cache of known agents

mod audit;
mod pin;
mod sqlite;
mod traits;

pub use audit::*;
pub use pin::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Persistence failures. Callers on the enforcement path log these and
/// fall back to empty state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Database(String),

    #[error("Stored JSON is unreadable: {0}")]
    Serialization(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("No device at {0}")]
    NotFound(String),

    #[error("PIN rejected: {0}")]
    InvalidPin(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
