//! ELM327 Reply Parsing
//!
//! The adapter answers each request with one or more text lines terminated by
//! a `>` prompt. These helpers turn that text into the data bytes of the
//! reply, independent of the serial transport.

use crate::command::DiagnosticCommand;
use crate::decode::Decoder;
use crate::error::ObdError;

/// Prompt character the adapter prints when ready for the next command
pub const PROMPT: u8 = b'>';

/// Parsed adapter reply, header stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    NoData,
    Data(Vec<u8>),
}

/// Parse the raw text of a reply to `command`
pub fn parse_reply(command: &DiagnosticCommand, raw: &str) -> Result<Reply, ObdError> {
    let request = command.request();
    let lines: Vec<&str> = raw
        .split(|c| c == '\r' || c == '\n' || c == '>')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("SEARCHING"))
        .filter(|line| !line.replace(' ', "").eq_ignore_ascii_case(&request))
        .collect();

    if lines.is_empty() {
        return Err(ObdError::InvalidResponse("empty reply".to_string()));
    }

    for line in &lines {
        let upper = line.to_ascii_uppercase();
        if upper.contains("NO DATA") {
            return Ok(Reply::NoData);
        }
        if upper == "?" {
            return Err(ObdError::UnsupportedCommand(request));
        }
        if upper.contains("UNABLE TO CONNECT") {
            return Err(ObdError::VehicleNotConnected);
        }
        if upper.contains("CAN ERROR") || upper.contains("BUS ERROR") || upper.contains("BUS INIT") {
            return Err(ObdError::CanBusError(line.to_string()));
        }
        if upper.contains("STOPPED") || upper.contains("ERROR") {
            return Err(ObdError::InvalidResponse(line.to_string()));
        }
    }

    let messages = if lines.iter().any(|line| is_frame_line(line)) {
        vec![reassemble_frames(&lines)?]
    } else {
        lines
            .iter()
            .map(|line| {
                parse_hex(line)
                    .ok_or_else(|| ObdError::InvalidResponse(format!("not hex: {}", line)))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut matching = messages
        .into_iter()
        .filter_map(|message| strip_header(command, &message).map(<[u8]>::to_vec));

    let data = match command.decoder() {
        Decoder::Dtc => {
            // Every ECU reports its own codes, each CAN reply behind its own count byte
            let merged: Vec<Vec<u8>> = matching.map(strip_dtc_count).collect();
            if merged.is_empty() {
                None
            } else {
                Some(merged.concat())
            }
        }
        Decoder::Vin => {
            let mut parts: Vec<Vec<u8>> = matching.collect();
            if parts.len() > 1 {
                Some(join_sequenced(parts))
            } else {
                parts.pop()
            }
        }
        _ => matching.next(),
    };

    data.map(Reply::Data).ok_or_else(|| {
        ObdError::InvalidResponse(format!("no reply matching request {}", request))
    })
}

/// Drop the leading count byte of a CAN trouble code reply.
///
/// Code pairs are always two bytes, so an odd length means a count is present.
fn strip_dtc_count(mut data: Vec<u8>) -> Vec<u8> {
    if data.len() % 2 == 1 {
        data.remove(0);
    }
    data
}

/// Join single-frame lines that each start with a sequence number, as
/// ISO 9141 and KWP adapters send a VIN
fn join_sequenced(mut parts: Vec<Vec<u8>>) -> Vec<u8> {
    parts.sort_by_key(|part| part.first().copied());
    parts
        .into_iter()
        .flat_map(|part| part.into_iter().skip(1))
        .collect()
}

/// Data bytes following the `mode + 0x40, pid...` header, if it matches
fn strip_header<'a>(command: &DiagnosticCommand, message: &'a [u8]) -> Option<&'a [u8]> {
    let (&mode, rest) = message.split_first()?;
    if mode != command.mode().wrapping_add(0x40) {
        return None;
    }
    let width = command.pid_width();
    if rest.len() < width {
        return None;
    }
    let echoed = rest[..width]
        .iter()
        .fold(0u16, |acc, &b| (acc << 8) | u16::from(b));
    match command.pid() {
        Some(pid) if width > 0 && echoed != pid => None,
        _ => Some(&rest[width..]),
    }
}

/// ISO-TP multi-frame lines look like `0:490201314847`
fn is_frame_line(line: &str) -> bool {
    matches!(line.split_once(':'), Some((index, _)) if !index.is_empty() && index.trim().chars().all(|c| c.is_ascii_hexdigit()))
}

fn reassemble_frames(lines: &[&str]) -> Result<Vec<u8>, ObdError> {
    let mut length: Option<usize> = None;
    let mut frames: Vec<(u8, Vec<u8>)> = Vec::new();

    for line in lines {
        match line.split_once(':') {
            Some((index, body)) => {
                let index = u8::from_str_radix(index.trim(), 16)
                    .map_err(|_| ObdError::InvalidResponse(format!("bad frame index: {}", line)))?;
                let body = parse_hex(body)
                    .ok_or_else(|| ObdError::InvalidResponse(format!("not hex: {}", line)))?;
                frames.push((index, body));
            }
            None => {
                let declared = usize::from_str_radix(&line.replace(' ', ""), 16)
                    .map_err(|_| ObdError::InvalidResponse(format!("bad frame length: {}", line)))?;
                length = Some(declared);
            }
        }
    }

    frames.sort_by_key(|(index, _)| *index);
    let mut message: Vec<u8> = frames.into_iter().flat_map(|(_, body)| body).collect();
    if let Some(length) = length {
        message.truncate(length);
    }
    Ok(message)
}

/// Parse a line of hex digits, ignoring spaces
pub fn parse_hex(line: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = line.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

/// PIDs flagged in a `01 00/20/40...` support bitmask reply
///
/// Bit 31 of the four data bytes stands for `base + 1`.
pub fn supported_pids(base: u8, data: &[u8]) -> Vec<u8> {
    let mask = data
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    (0..32u8)
        .filter(|bit| mask & (1 << (31 - bit)) != 0)
        .filter_map(|bit| base.checked_add(bit + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRegistry;
    use crate::decode::decode_dtcs;
    use proptest::prelude::*;

    fn command(name: &str) -> DiagnosticCommand {
        CommandRegistry::standard().lookup(name).unwrap().clone()
    }

    #[test]
    fn test_single_line_reply() {
        let reply = parse_reply(&command("RPM"), "41 0C 1A F8 \r\r>").unwrap();
        assert_eq!(reply, Reply::Data(vec![0x1A, 0xF8]));
    }

    #[test]
    fn test_reply_without_spaces_and_echo() {
        let reply = parse_reply(&command("SPEED"), "010D\r410D37\r\r>").unwrap();
        assert_eq!(reply, Reply::Data(vec![0x37]));
    }

    #[test]
    fn test_no_data() {
        let reply = parse_reply(&command("RPM"), "SEARCHING...\rNO DATA\r\r>").unwrap();
        assert_eq!(reply, Reply::NoData);
    }

    #[test]
    fn test_unsupported_and_errors() {
        assert!(matches!(
            parse_reply(&command("RPM"), "?\r>"),
            Err(ObdError::UnsupportedCommand(_))
        ));
        assert!(matches!(
            parse_reply(&command("RPM"), "UNABLE TO CONNECT\r>"),
            Err(ObdError::VehicleNotConnected)
        ));
        assert!(matches!(
            parse_reply(&command("RPM"), "CAN ERROR\r>"),
            Err(ObdError::CanBusError(_))
        ));
    }

    #[test]
    fn test_mismatched_pid_rejected() {
        assert!(parse_reply(&command("RPM"), "41 0D 37\r>").is_err());
    }

    #[test]
    fn test_multi_ecu_dtc_merge() {
        let reply = parse_reply(&command("GET_DTC"), "43 01 33 00 00\r43 C1 23\r>").unwrap();
        assert_eq!(reply, Reply::Data(vec![0x01, 0x33, 0x00, 0x00, 0xC1, 0x23]));
    }

    #[test]
    fn test_multi_ecu_can_dtc_count_bytes_dropped() {
        let reply = parse_reply(&command("GET_DTC"), "43 01 01 33\r43 00\r\r>").unwrap();
        assert_eq!(reply, Reply::Data(vec![0x01, 0x33]));

        match reply {
            Reply::Data(data) => {
                let codes: Vec<_> = decode_dtcs(&data).into_iter().map(|c| c.code).collect();
                assert_eq!(codes, vec!["P0133"]);
            }
            Reply::NoData => unreachable!(),
        }
    }

    #[test]
    fn test_multi_ecu_can_dtc_both_reporting() {
        let raw = "43 02 01 33 01 01\r43 01 C1 23\r>";
        let reply = parse_reply(&command("GET_DTC"), raw).unwrap();
        assert_eq!(reply, Reply::Data(vec![0x01, 0x33, 0x01, 0x01, 0xC1, 0x23]));
    }

    #[test]
    fn test_legacy_vin_lines_joined_in_sequence() {
        // ISO 9141 style: one line per four characters, first padded with zeros
        let raw = "49 02 02 48 47 43 4D\r\
                   49 02 01 00 00 00 31\r\
                   49 02 03 38 32 36 33\r\
                   49 02 04 33 41 30 30\r\
                   49 02 05 34 33 35 32\r>";
        let vin = command("VIN");
        let data = match parse_reply(&vin, raw).unwrap() {
            Reply::Data(data) => data,
            Reply::NoData => panic!("expected data"),
        };
        assert_eq!(data.len(), 20);

        match vin.decoder().decode(&data).unwrap() {
            crate::Payload::Bytes(bytes) => assert_eq!(bytes, b"1HGCM82633A004352"),
            _ => panic!("expected VIN bytes"),
        }
    }

    #[test]
    fn test_multi_frame_vin() {
        let raw = "014\r0: 49 02 01 31 48 47\r1: 43 4D 38 32 36 33 33\r2: 41 30 30 34 33 35 32\r>";
        match parse_reply(&command("VIN"), raw).unwrap() {
            Reply::Data(data) => {
                assert_eq!(data[0], 0x01);
                assert_eq!(&data[1..], b"1HGCM82633A004352");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_supported_pids_bitmask() {
        // BE 1F A8 13: 01,03,04,05,06,07,0C,0D,0E,0F,10,11,13,15,1C,1F,20
        let pids = supported_pids(0x00, &[0xBE, 0x1F, 0xA8, 0x13]);
        assert_eq!(
            pids,
            vec![0x01, 0x03, 0x04, 0x05, 0x06, 0x07, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x13, 0x15, 0x1C, 0x1F, 0x20]
        );
        assert_eq!(supported_pids(0x20, &[0x80, 0, 0, 0]), vec![0x21]);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("41 0C"), Some(vec![0x41, 0x0C]));
        assert_eq!(parse_hex("410"), None);
        assert_eq!(parse_hex("ZZ"), None);
    }

    fn hex_line(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn nonzero_code() -> impl Strategy<Value = (u8, u8)> {
        (any::<u8>(), any::<u8>()).prop_filter("0000 is padding", |(a, b)| *a != 0 || *b != 0)
    }

    proptest! {
        #[test]
        fn prop_parse_hex_reads_formatted_bytes(bytes in proptest::collection::vec(any::<u8>(), 1..16)) {
            prop_assert_eq!(parse_hex(&hex_line(&bytes)), Some(bytes.clone()));
            prop_assert_eq!(parse_hex(&hex_line(&bytes).replace(' ', "")), Some(bytes));
        }

        #[test]
        fn prop_decode_dtcs_is_total(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let codes = decode_dtcs(&data);
            prop_assert!(codes.len() <= data.len() / 2);
            prop_assert!(codes.iter().all(|c| c.code.len() == 5));
        }

        #[test]
        fn prop_can_dtc_replies_decode_exactly_reported_codes(
            ecus in proptest::collection::vec(proptest::collection::vec(nonzero_code(), 0..=2), 1..4),
        ) {
            let raw: String = ecus
                .iter()
                .map(|codes| {
                    let mut frame = vec![0x43, codes.len() as u8];
                    for (a, b) in codes {
                        frame.extend([*a, *b]);
                    }
                    format!("{}\r", hex_line(&frame))
                })
                .collect::<String>()
                + ">";

            let data = match parse_reply(&command("GET_DTC"), &raw).unwrap() {
                Reply::Data(data) => data,
                Reply::NoData => panic!("expected data"),
            };
            let expected: Vec<String> = ecus
                .iter()
                .flatten()
                .map(|(a, b)| decode_dtcs(&[*a, *b])[0].code.clone())
                .collect();
            let decoded: Vec<String> = decode_dtcs(&data).into_iter().map(|c| c.code).collect();
            prop_assert_eq!(decoded, expected);
        }
    }
}
