//! Diagnostic Link Abstraction
//!
//! The poller only ever talks to the vehicle through this trait, so the
//! ELM327 client, the simulator and test doubles are interchangeable.

use crate::command::DiagnosticCommand;
use crate::error::ObdError;
use crate::response::RawResponse;
use async_trait::async_trait;
use std::time::Duration;

/// Parameters passed at connect time
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Serial device path; `None` scans the usual candidates
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Append the expected response count to mode 01 requests
    pub fast: bool,
    /// Upper bound for a single query
    pub timeout: Duration,
    pub protocol: crate::ObdProtocol,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 38400,
            fast: false,
            timeout: Duration::from_secs(1),
            protocol: crate::ObdProtocol::Auto,
        }
    }
}

/// A connection to the vehicle that can execute one query at a time.
///
/// A failed query must leave the link usable for the next one.
#[async_trait]
pub trait DiagnosticLink: Send {
    /// Whether the connection handshake succeeded and the link is still open
    fn is_connected(&self) -> bool;

    /// Identifying port or address, for logging
    fn port_name(&self) -> Option<&str>;

    /// Execute a single command
    async fn query(&mut self, command: &DiagnosticCommand) -> Result<RawResponse, ObdError>;

    /// Commands the connected vehicle reports as supported
    async fn supported_commands(&mut self) -> Result<Vec<DiagnosticCommand>, ObdError> {
        Ok(Vec::new())
    }

    /// Every command this link knows how to issue, regardless of support
    fn known_commands(&self) -> Vec<DiagnosticCommand> {
        crate::command::standard_commands()
    }

    /// Release the transport. Idempotent.
    async fn close(&mut self);
}
