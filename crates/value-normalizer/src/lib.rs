//! Response Value Normalization
//!
//! Converts heterogeneous diagnostic response payloads into JSON values so
//! every poll record field has a stable, serializable shape.

mod normalizer;

pub use normalizer::{decode_bytes, normalize, normalize_outcome, normalize_payload, DecodedBytes};
