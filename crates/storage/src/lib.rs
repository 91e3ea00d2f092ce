//! Storage Layer
//!
//! Persists poll records as JSON Lines: one self-contained object per line,
//! appended and flushed per cycle.

mod jsonl;
mod record;

pub use jsonl::{append, read_records, JsonlWriter};
pub use record::{PollRecord, TIMESTAMP_KEY};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Malformed record on line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
