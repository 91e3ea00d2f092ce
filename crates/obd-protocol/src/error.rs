//! Diagnostic Link Errors

use thiserror::Error;

/// Failure of a connection attempt or a single query.
///
/// Query errors leave the link usable; the caller decides whether to retry.
#[derive(Debug, Clone, Error)]
pub enum ObdError {
    /// Opening, reading or writing the serial device failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No prompt within the given number of milliseconds
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Reply could not be parsed or decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Adapter answered `?` to the request
    #[error("Command {0} not supported by adapter or vehicle")]
    UnsupportedCommand(String),

    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),

    #[error("OBD adapter not responding")]
    AdapterNotResponding,

    /// Every candidate port failed the handshake
    #[error("No OBD adapter found")]
    NoAdapter,

    /// Adapter reported a bus fault (`CAN ERROR`, `BUS ERROR`, `BUS INIT`)
    #[error("CAN bus error: {0}")]
    CanBusError(String),

    #[error("Vehicle ignition is off or not connected")]
    VehicleNotConnected,
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
