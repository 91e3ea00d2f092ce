//! OBD-II Protocol Implementation
//!
//! This crate provides the diagnostic commands, response payloads and the
//! async diagnostic link used to query a vehicle through an ELM327-compatible
//! adapter. It supports ISO 15765-4 (CAN) and legacy protocols.

mod client;
mod command;
mod decode;
pub mod elm327;
mod error;
mod link;
mod protocol;
mod response;

pub use client::ObdClient;
pub use command::{standard_commands, CommandRegistry, DiagnosticCommand};
pub use decode::{decode_dtcs, Decoder, FuelSystemStatus};
pub use error::ObdError;
pub use link::{ConnectOptions, DiagnosticLink};
pub use protocol::ObdProtocol;
pub use response::{Payload, Quantity, RawResponse, TroubleCode, Unit};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Pending trouble codes
    pub const PENDING_DTC: u8 = 0x07;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
    /// Manufacturer-specific extended data (read data by identifier)
    pub const MANUFACTURER: u8 = 0x22;
}
