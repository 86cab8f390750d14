//! Text and JSON rendering for the offline commands (`packet`, `commands`)

use doorlock_transport::{describe_packet, CommandCode, Packet};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid command code {0:?} (expected hex, e.g. 01 or 0x1D)")]
pub struct ParseCodeError(pub String);

/// Parse a command code given in hex, with or without `0x`
pub fn parse_code(text: &str) -> Result<CommandCode, ParseCodeError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u8::from_str_radix(digits, 16)
        .map(CommandCode)
        .map_err(|_| ParseCodeError(text.to_string()))
}

/// One row of the `commands` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRow {
    pub code: u8,
    pub name: &'static str,
    pub frame_len: usize,
}

pub fn command_rows() -> Vec<CommandRow> {
    CommandCode::all()
        .map(|code| CommandRow {
            code: code.value(),
            name: code.name(),
            frame_len: code.shape().len(),
        })
        .collect()
}

pub fn command_table() -> String {
    command_rows()
        .iter()
        .map(|row| format!("0x{:02X}  {:<20} {:>2} bytes", row.code, row.name, row.frame_len))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable frame dump
pub fn packet_text(packet: &Packet) -> String {
    let code = packet.code();
    let mut out = format!(
        "0x{:02X} {} ({} bytes)\n{}",
        code.value(),
        code.name(),
        packet.len(),
        packet.to_hex()
    );
    if code.name() == "UNKNOWN" {
        out.push_str("\nunknown code: payload left empty");
    }
    out
}

pub fn packet_json(packet: &Packet) -> serde_json::Value {
    json!({
        "hex": packet.to_hex(),
        "bytes": packet.as_bytes(),
        "summary": describe_packet(packet.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("01"), Ok(CommandCode(0x01)));
        assert_eq!(parse_code("0x1d"), Ok(CommandCode(0x1D)));
        assert_eq!(parse_code(" 21 "), Ok(CommandCode(0x21)));
        assert!(parse_code("").is_err());
        assert!(parse_code("zz").is_err());
        assert!(parse_code("100").is_err());
    }

    #[test]
    fn test_packet_text() {
        let packet = doorlock_transport::build_packet(
            CommandCode(0x21),
            &Default::default(),
            &doorlock_transport::SystemClock,
        );
        assert_eq!(
            packet_text(&packet),
            "0x21 ENTRANCE_OPEN (10 bytes)\nCC 21 01 00 00 00 00 00 00 EE"
        );
    }

    #[test]
    fn test_command_rows() {
        let rows = command_rows();
        assert_eq!(rows.len(), 33);
        let enroll = rows.iter().find(|r| r.code == 0x1D).unwrap();
        assert_eq!(enroll.name, "CARD_ENROLL");
        assert_eq!(enroll.frame_len, 13);
    }
}
