//! OBD-II Protocol Selection

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Vehicle bus protocol, numbered as the ELM327 numbers them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Let the adapter search
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP, slow init
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP, fast init
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN, 11 bit ID, 500 kbaud
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN, 29 bit ID, 500 kbaud
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN, 11 bit ID, 250 kbaud
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN, 29 bit ID, 250 kbaud
    Iso15765_4Can29bit250,
}

/// Indexed by ELM327 protocol number
const BY_NUMBER: [ObdProtocol; 10] = [
    ObdProtocol::Auto,
    ObdProtocol::J1850Pwm,
    ObdProtocol::J1850Vpw,
    ObdProtocol::Iso9141_2,
    ObdProtocol::Iso14230_4Kwp,
    ObdProtocol::Iso14230_4KwpFast,
    ObdProtocol::Iso15765_4Can11bit500,
    ObdProtocol::Iso15765_4Can29bit500,
    ObdProtocol::Iso15765_4Can11bit250,
    ObdProtocol::Iso15765_4Can29bit250,
];

impl ObdProtocol {
    /// ELM327 protocol number, as used by `ATSPn` and reported by `ATDPN`
    pub fn elm_number(self) -> u8 {
        BY_NUMBER
            .iter()
            .position(|p| *p == self)
            .map_or(0, |n| n as u8)
    }

    pub fn from_elm_number(number: char) -> Option<Self> {
        let index = number.to_digit(10)? as usize;
        BY_NUMBER.get(index).copied()
    }

    /// `AT` command selecting this protocol
    pub fn select_command(self) -> String {
        format!("ATSP{}", self.elm_number())
    }
}

impl FromStr for ObdProtocol {
    type Err = ObdError;

    /// Accepts `auto` or an ELM327 protocol number `0`-`9`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ObdProtocol::Auto);
        }
        // `ATDPN` prefixes automatically detected protocols with `A`
        let digit = s.strip_prefix('A').unwrap_or(s);
        let mut chars = digit.chars();
        let protocol = match (chars.next(), chars.next()) {
            (Some(number), None) => Self::from_elm_number(number),
            _ => None,
        };
        protocol.ok_or_else(|| ObdError::UnsupportedProtocol(s.to_string()))
    }
}
