//! Payload Decoding
//!
//! Converts the data bytes of an adapter reply (header already stripped) into
//! a [`Payload`] according to the command's decoding formula.

use crate::error::ObdError;
use crate::response::{Payload, Quantity, TroubleCode, Unit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decoding formula for a command's data bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Decoder {
    /// PID 01: MIL state, DTC count, ignition type
    MonitorStatus,
    /// PID 03: fuel system loop state
    FuelStatus,
    /// A * 100 / 255 (%)
    Percent,
    /// (A - 128) * 100 / 128 (%)
    FuelTrim,
    /// A - 40 (°C)
    Temperature,
    /// A (kPa)
    Pressure,
    /// ((A*256)+B)/4
    Rpm,
    /// A (km/h)
    Speed,
    /// A/2 - 64 (° before TDC)
    TimingAdvance,
    /// ((A*256)+B) / 100 (g/s)
    Maf,
    /// A / 200 (V)
    O2Voltage,
    /// PID 1C: which OBD standard the vehicle conforms to
    ObdCompliance,
    /// PID 1E: power take-off active
    AuxInput,
    /// (A*256)+B (s)
    Seconds,
    /// (A*256)+B (km)
    Distance,
    /// ((A*256)+B) / 1000 (V)
    ModuleVoltage,
    /// Mode 03 / 07 trouble code list
    Dtc,
    /// Mode 09 PID 02 vehicle identification number
    Vin,
    /// Undecoded bytes
    Raw,
    /// Big-endian unsigned integer of `bytes` width, then `raw * scale + offset`
    Linear {
        bytes: u8,
        scale: f64,
        offset: f64,
        unit: Unit,
    },
}

impl Decoder {
    /// Decode the data bytes of a reply
    pub fn decode(&self, data: &[u8]) -> Result<Payload, ObdError> {
        let payload = match self {
            Decoder::MonitorStatus => {
                let [a, b] = take::<2>(data)?;
                Payload::Structured(serde_json::json!({
                    "mil": a & 0x80 != 0,
                    "dtc_count": a & 0x7F,
                    "ignition_type": if b & 0x08 != 0 { "compression" } else { "spark" },
                }))
            }
            Decoder::FuelStatus => {
                let [a] = take::<1>(data)?;
                Payload::Opaque(Arc::new(FuelSystemStatus::from_bits(a)))
            }
            Decoder::Percent => quantity(f64::from(take::<1>(data)?[0]) * 100.0 / 255.0, Unit::Percent),
            Decoder::FuelTrim => {
                let [a] = take::<1>(data)?;
                quantity((f64::from(a) - 128.0) * 100.0 / 128.0, Unit::Percent)
            }
            Decoder::Temperature => quantity(f64::from(take::<1>(data)?[0]) - 40.0, Unit::Celsius),
            Decoder::Pressure => quantity(f64::from(take::<1>(data)?[0]), Unit::Kilopascal),
            Decoder::Rpm => quantity(word(data)? / 4.0, Unit::Rpm),
            Decoder::Speed => quantity(f64::from(take::<1>(data)?[0]), Unit::Kph),
            Decoder::TimingAdvance => {
                quantity(f64::from(take::<1>(data)?[0]) / 2.0 - 64.0, Unit::Degree)
            }
            Decoder::Maf => quantity(word(data)? / 100.0, Unit::GramsPerSecond),
            Decoder::O2Voltage => quantity(f64::from(take::<1>(data)?[0]) / 200.0, Unit::Volt),
            Decoder::ObdCompliance => {
                let [a] = take::<1>(data)?;
                Payload::Text(obd_standard_name(a).to_string())
            }
            Decoder::AuxInput => Payload::Flag(take::<1>(data)?[0] & 0x01 != 0),
            Decoder::Seconds => quantity(word(data)?, Unit::Second),
            Decoder::Distance => quantity(word(data)?, Unit::Kilometer),
            Decoder::ModuleVoltage => quantity(word(data)? / 1000.0, Unit::Volt),
            Decoder::Dtc => Payload::TroubleCodes(decode_dtcs(data)),
            Decoder::Vin => {
                // CAN replies prefix the 17 characters with an item count
                let vin = if data.len() > 17 { &data[data.len() - 17..] } else { data };
                Payload::Bytes(vin.to_vec())
            }
            Decoder::Raw => Payload::Bytes(data.to_vec()),
            Decoder::Linear {
                bytes,
                scale,
                offset,
                unit,
            } => {
                let width = usize::from(*bytes).clamp(1, 8);
                if data.len() < width {
                    return Err(short_reply(width, data.len()));
                }
                let raw = data[..width]
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                quantity(raw as f64 * scale + offset, *unit)
            }
        };
        Ok(payload)
    }
}

/// Fuel system loop state reported by PID 03
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuelSystemStatus {
    OpenLoopTemperature,
    ClosedLoop,
    OpenLoopLoad,
    OpenLoopFailure,
    ClosedLoopFault,
    Unknown(u8),
}

impl FuelSystemStatus {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0x01 => Self::OpenLoopTemperature,
            0x02 => Self::ClosedLoop,
            0x04 => Self::OpenLoopLoad,
            0x08 => Self::OpenLoopFailure,
            0x10 => Self::ClosedLoopFault,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for FuelSystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenLoopTemperature => f.write_str("Open loop due to insufficient engine temperature"),
            Self::ClosedLoop => f.write_str("Closed loop, using oxygen sensor feedback"),
            Self::OpenLoopLoad => f.write_str("Open loop due to engine load OR fuel cut"),
            Self::OpenLoopFailure => f.write_str("Open loop due to system failure"),
            Self::ClosedLoopFault => f.write_str("Closed loop, feedback system fault"),
            Self::Unknown(bits) => write!(f, "Unknown fuel status {:02X}", bits),
        }
    }
}

fn obd_standard_name(code: u8) -> &'static str {
    match code {
        1 => "OBD-II as defined by the CARB",
        2 => "OBD as defined by the EPA",
        3 => "OBD and OBD-II",
        4 => "OBD-I",
        5 => "Not OBD compliant",
        6 => "EOBD (Europe)",
        7 => "EOBD and OBD-II",
        8 => "EOBD and OBD",
        9 => "EOBD, OBD and OBD II",
        10 => "JOBD (Japan)",
        11 => "JOBD and OBD II",
        12 => "JOBD and EOBD",
        13 => "JOBD, EOBD, and OBD II",
        _ => "Unknown",
    }
}

/// Decode a mode 03/07 reply into trouble codes
///
/// CAN replies carry a leading count byte, which shows up as an odd length.
pub fn decode_dtcs(data: &[u8]) -> Vec<TroubleCode> {
    let data = if data.len() % 2 == 1 { &data[1..] } else { data };
    data.chunks_exact(2)
        .filter(|pair| pair[0] != 0 || pair[1] != 0)
        .map(|pair| TroubleCode::new(format_dtc(pair[0], pair[1])))
        .collect()
}

fn format_dtc(a: u8, b: u8) -> String {
    let system = match a >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    format!("{}{}{:01X}{:02X}", system, (a >> 4) & 0x03, a & 0x0F, b)
}

fn quantity(magnitude: f64, unit: Unit) -> Payload {
    Payload::Quantity(Quantity::new(magnitude, unit))
}

fn take<const N: usize>(data: &[u8]) -> Result<[u8; N], ObdError> {
    data.get(..N)
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or_else(|| short_reply(N, data.len()))
}

fn word(data: &[u8]) -> Result<f64, ObdError> {
    let [a, b] = take::<2>(data)?;
    Ok(f64::from(a) * 256.0 + f64::from(b))
}

fn short_reply(expected: usize, actual: usize) -> ObdError {
    ObdError::InvalidResponse(format!(
        "expected {} data bytes, got {}",
        expected, actual
    ))
}
