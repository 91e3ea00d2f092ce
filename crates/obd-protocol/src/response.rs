//! Response Payloads
//!
//! A query against the diagnostic link yields either no data or a payload of
//! one of several shapes. Consumers match on [`Payload`] rather than probing
//! for capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Physical unit attached to a decoded quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Rpm,
    Kph,
    Celsius,
    Percent,
    GramsPerSecond,
    Kilopascal,
    Volt,
    Degree,
    Second,
    Kilometer,
    /// Unitless ratio or raw count
    Count,
}

impl Unit {
    /// Short symbol used in log output
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Rpm => "rpm",
            Unit::Kph => "km/h",
            Unit::Celsius => "°C",
            Unit::Percent => "%",
            Unit::GramsPerSecond => "g/s",
            Unit::Kilopascal => "kPa",
            Unit::Volt => "V",
            Unit::Degree => "°",
            Unit::Second => "s",
            Unit::Kilometer => "km",
            Unit::Count => "",
        }
    }

    /// Parse a unit name as written in configuration files
    pub fn from_name(name: &str) -> Option<Self> {
        let unit = match name.to_ascii_lowercase().as_str() {
            "rpm" => Unit::Rpm,
            "kph" | "km/h" => Unit::Kph,
            "celsius" | "c" | "degc" => Unit::Celsius,
            "percent" | "%" => Unit::Percent,
            "gps" | "g/s" => Unit::GramsPerSecond,
            "kpa" => Unit::Kilopascal,
            "volt" | "v" => Unit::Volt,
            "degree" | "deg" => Unit::Degree,
            "second" | "s" => Unit::Second,
            "kilometer" | "km" => Unit::Kilometer,
            "count" | "" => Unit::Count,
            _ => return None,
        };
        Some(unit)
    }
}

/// A magnitude with its unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub magnitude: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Count => write!(f, "{}", self.magnitude),
            unit => write!(f, "{} {}", self.magnitude, unit.symbol()),
        }
    }
}

/// A diagnostic trouble code as reported by a control unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroubleCode {
    /// Five-character code, e.g. `P0133`
    pub code: String,
    pub description: Option<String>,
}

impl TroubleCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: None,
        }
    }
}

/// Decoded content of a non-empty response
#[derive(Clone)]
pub enum Payload {
    /// Physical quantity (most mode 01 PIDs)
    Quantity(Quantity),
    /// Raw byte buffer (VIN, undecoded manufacturer PIDs)
    Bytes(Vec<u8>),
    /// Trouble code list (mode 03 / 07), possibly empty
    TroubleCodes(Vec<TroubleCode>),
    Number(f64),
    Text(String),
    Flag(bool),
    /// Already JSON-shaped value (lists, mappings)
    Structured(serde_json::Value),
    /// Anything else; only its display form is meaningful
    Opaque(Arc<dyn fmt::Display + Send + Sync>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Quantity(q) => f.debug_tuple("Quantity").field(q).finish(),
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Payload::TroubleCodes(c) => f.debug_tuple("TroubleCodes").field(c).finish(),
            Payload::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Payload::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Payload::Flag(b) => f.debug_tuple("Flag").field(b).finish(),
            Payload::Structured(v) => f.debug_tuple("Structured").field(v).finish(),
            Payload::Opaque(o) => f.debug_tuple("Opaque").field(&o.to_string()).finish(),
        }
    }
}

/// Result of a successful query against the diagnostic link
///
/// Query failures are reported separately as [`crate::ObdError`].
#[derive(Debug, Clone)]
pub enum RawResponse {
    /// The vehicle answered with no data
    Empty,
    Value(Payload),
}

impl RawResponse {
    pub fn is_empty(&self) -> bool {
        matches!(self, RawResponse::Empty)
    }
}

impl From<Payload> for RawResponse {
    fn from(payload: Payload) -> Self {
        RawResponse::Value(payload)
    }
}

impl From<Quantity> for RawResponse {
    fn from(quantity: Quantity) -> Self {
        RawResponse::Value(Payload::Quantity(quantity))
    }
}
