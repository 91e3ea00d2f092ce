//! Poller Error Types

use obd_protocol::ObdError;
use obd_storage::StorageError;
use thiserror::Error;

/// Fatal conditions that end a run.
///
/// Individual query failures never surface here; they become `null` fields.
#[derive(Debug, Error)]
pub enum PollError {
    /// Adapter unreachable or handshake failed
    #[error("Connection failed: {0}")]
    Connection(#[source] ObdError),

    /// Supported commands could not be enumerated
    #[error("Command discovery failed: {0}")]
    Discovery(String),

    /// A record could not be written
    #[error("Log persistence failed: {0}")]
    Persistence(#[from] StorageError),
}
