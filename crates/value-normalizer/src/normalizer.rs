//! Payload to JSON Normalization

use obd_protocol::{ObdError, Payload, RawResponse};
use serde_json::{Number, Value};
use tracing::trace;

/// Outcome of decoding a byte payload as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBytes {
    /// UTF-8 text with invalid sequences dropped
    Text(String),
    /// Nothing decodable; the raw byte values
    Raw(Vec<u8>),
}

impl DecodedBytes {
    pub fn into_value(self) -> Value {
        match self {
            DecodedBytes::Text(text) => Value::String(text),
            DecodedBytes::Raw(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        }
    }
}

/// Decode bytes as UTF-8, dropping invalid sequences.
///
/// A non-empty buffer that yields no text at all falls back to its raw
/// byte values.
pub fn decode_bytes(bytes: &[u8]) -> DecodedBytes {
    let mut text = String::with_capacity(bytes.len());
    let mut rest = bytes;

    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&rest[..valid_up_to]) {
                    text.push_str(valid);
                }
                // `None` means a truncated sequence at the end of the buffer
                let skip = e.error_len().unwrap_or(rest.len() - valid_up_to);
                rest = &rest[valid_up_to + skip..];
            }
        }
    }

    if text.is_empty() && !bytes.is_empty() {
        trace!("{} bytes hold no text, keeping raw values", bytes.len());
        DecodedBytes::Raw(bytes.to_vec())
    } else {
        DecodedBytes::Text(text)
    }
}

/// JSON projection of a payload
pub fn normalize_payload(payload: &Payload) -> Value {
    match payload {
        Payload::Quantity(quantity) => number(quantity.magnitude),
        Payload::Bytes(bytes) => decode_bytes(bytes).into_value(),
        Payload::TroubleCodes(codes) => {
            Value::Array(codes.iter().map(|c| Value::String(c.code.clone())).collect())
        }
        Payload::Number(n) => number(*n),
        Payload::Text(text) => Value::String(text.clone()),
        Payload::Flag(flag) => Value::Bool(*flag),
        Payload::Structured(value) => value.clone(),
        Payload::Opaque(other) => Value::String(other.to_string()),
    }
}

/// JSON projection of a response; no data maps to `null`
pub fn normalize(response: &RawResponse) -> Value {
    match response {
        RawResponse::Empty => Value::Null,
        RawResponse::Value(payload) => normalize_payload(payload),
    }
}

/// JSON projection of a query outcome; failed queries map to `null`
pub fn normalize_outcome(outcome: &Result<RawResponse, ObdError>) -> Value {
    match outcome {
        Ok(response) => normalize(response),
        Err(_) => Value::Null,
    }
}

/// Non-finite magnitudes have no JSON representation
fn number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
