//! Versioned bidirectional command frame codec.
//!
//! Autopilot commands travel back over the same connections that carry
//! telemetry. The encoding is a versioned frame, version 1:
//!
//! - Text transports (NMEA 0183 streams, WebSocket text) carry proprietary
//!   sentences: `$PBRC,1,ENGAGE,auto,120.0*hh`, answered with
//!   `$PBRA,1,ACK*hh` or `$PBRA,1,NAK,rate limited*hh`.
//! - Binary transports (NMEA 2000 streams, WebSocket binary) carry the same
//!   command behind a two-byte magic, a version byte and a little-endian
//!   length, with the body bincode-encoded. The length prefix lets TCP
//!   readers frame commands out of the byte stream.
//!
//! Unknown versions are NAKed with reason `version`, never guessed at.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::autopilot::AutopilotMode;
use crate::nmea0183::{checksum, make_sentence};

/// Current command frame version.
pub const COMMAND_VERSION: u8 = 1;

/// Magic prefix for binary command frames.
pub const BINARY_COMMAND_MAGIC: [u8; 2] = *b"BC";
/// Magic prefix for binary reply frames.
pub const BINARY_REPLY_MAGIC: [u8; 2] = *b"BA";

/// Address field of command sentences.
pub const COMMAND_ADDRESS: &str = "PBRC";
/// Address field of reply sentences.
pub const REPLY_ADDRESS: &str = "PBRA";

/// An autopilot command, decoded from either transport encoding.
///
/// Externally tagged so the bincode encoding stays a compact variant index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BridgeCommand {
    /// Engage the autopilot in `mode`, steering to `heading`.
    Engage { mode: AutopilotMode, heading: f64 },
    /// Change the target heading while engaged.
    SetHeading { heading: f64 },
    /// Drop to standby.
    Standby,
    /// Emergency disengage. Bypasses the rate limiter.
    Disengage,
}

impl BridgeCommand {
    /// Commands that must never be throttled.
    pub fn is_emergency(&self) -> bool {
        matches!(self, BridgeCommand::Disengage)
    }
}

/// Why a command was NAKed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NakReason {
    RateLimited,
    BadMode,
    HeadingRange,
    Malformed,
    Version,
}

impl NakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NakReason::RateLimited => "rate limited",
            NakReason::BadMode => "bad mode",
            NakReason::HeadingRange => "heading range",
            NakReason::Malformed => "malformed",
            NakReason::Version => "version",
        }
    }
}

/// ACK/NAK reply sent back to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandReply {
    Ack,
    Nak { reason: NakReason },
}

impl CommandReply {
    /// Encode as a `$PBRA` sentence.
    pub fn to_sentence(&self) -> String {
        match self {
            CommandReply::Ack => {
                make_sentence("P", "BRA", &[COMMAND_VERSION.to_string(), "ACK".to_string()])
            }
            CommandReply::Nak { reason } => make_sentence(
                "P",
                "BRA",
                &[
                    COMMAND_VERSION.to_string(),
                    "NAK".to_string(),
                    reason.as_str().to_string(),
                ],
            ),
        }
    }

    /// Encode as a binary reply frame.
    pub fn to_binary(&self) -> Vec<u8> {
        let body = bincode::serialize(self).expect("reply serialization cannot fail");
        let mut out = Vec::with_capacity(5 + body.len());
        out.extend_from_slice(&BINARY_REPLY_MAGIC);
        out.push(COMMAND_VERSION);
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend(body);
        out
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandParseError {
    #[error("not a command frame")]
    NotACommand,
    #[error("unsupported command version {0}")]
    Version(u8),
    #[error("bad checksum")]
    Checksum,
    #[error("malformed command: {0}")]
    Malformed(String),
}

impl CommandParseError {
    /// The NAK reason to answer this parse failure with.
    pub fn nak_reason(&self) -> NakReason {
        match self {
            CommandParseError::Version(_) => NakReason::Version,
            _ => NakReason::Malformed,
        }
    }
}

/// Quick test for whether a text line is addressed to the command channel.
pub fn is_command_sentence(line: &str) -> bool {
    line.trim_start().starts_with("$PBRC")
}

/// Quick test for whether a binary payload starts a command frame.
pub fn is_command_binary(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0..2] == BINARY_COMMAND_MAGIC
}

/// Parse a `$PBRC` sentence into a command.
pub fn parse_sentence(line: &str) -> Result<BridgeCommand, CommandParseError> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix('$')
        .ok_or(CommandParseError::NotACommand)?;
    let (body, cs) = rest
        .rsplit_once('*')
        .ok_or_else(|| CommandParseError::Malformed("missing checksum".to_string()))?;
    let provided =
        u8::from_str_radix(cs, 16).map_err(|_| CommandParseError::Checksum)?;
    if checksum(body) != provided {
        return Err(CommandParseError::Checksum);
    }

    let mut fields = body.split(',');
    if fields.next() != Some(COMMAND_ADDRESS) {
        return Err(CommandParseError::NotACommand);
    }
    let version: u8 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| CommandParseError::Malformed("missing version".to_string()))?;
    if version != COMMAND_VERSION {
        return Err(CommandParseError::Version(version));
    }

    let verb = fields
        .next()
        .ok_or_else(|| CommandParseError::Malformed("missing verb".to_string()))?;
    match verb {
        "ENGAGE" => {
            let mode: AutopilotMode = fields
                .next()
                .and_then(|m| m.parse().ok())
                .ok_or_else(|| CommandParseError::Malformed("bad mode".to_string()))?;
            let heading: f64 = fields
                .next()
                .and_then(|h| h.parse().ok())
                .ok_or_else(|| CommandParseError::Malformed("bad heading".to_string()))?;
            Ok(BridgeCommand::Engage { mode, heading })
        }
        "HEADING" => {
            let heading: f64 = fields
                .next()
                .and_then(|h| h.parse().ok())
                .ok_or_else(|| CommandParseError::Malformed("bad heading".to_string()))?;
            Ok(BridgeCommand::SetHeading { heading })
        }
        "STANDBY" => Ok(BridgeCommand::Standby),
        "DISENGAGE" => Ok(BridgeCommand::Disengage),
        other => Err(CommandParseError::Malformed(format!(
            "unknown verb '{}'",
            other
        ))),
    }
}

/// Encode a command as a `$PBRC` sentence.
pub fn to_sentence(command: &BridgeCommand) -> String {
    let mut fields = vec![COMMAND_VERSION.to_string()];
    match command {
        BridgeCommand::Engage { mode, heading } => {
            fields.push("ENGAGE".to_string());
            fields.push(mode.to_string());
            fields.push(format!("{:.1}", heading));
        }
        BridgeCommand::SetHeading { heading } => {
            fields.push("HEADING".to_string());
            fields.push(format!("{:.1}", heading));
        }
        BridgeCommand::Standby => fields.push("STANDBY".to_string()),
        BridgeCommand::Disengage => fields.push("DISENGAGE".to_string()),
    }
    make_sentence("P", "BRC", &fields)
}

/// Parse a binary command frame, returning the command and bytes consumed.
///
/// Returns `Ok(None)` if `bytes` starts a frame that is not complete yet, so
/// stream readers can wait for more data.
pub fn parse_binary(bytes: &[u8]) -> Result<Option<(BridgeCommand, usize)>, CommandParseError> {
    if bytes.len() < 2 || bytes[0..2] != BINARY_COMMAND_MAGIC {
        return Err(CommandParseError::NotACommand);
    }
    if bytes.len() < 5 {
        return Ok(None);
    }
    let version = bytes[2];
    if version != COMMAND_VERSION {
        return Err(CommandParseError::Version(version));
    }
    let len = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
    if bytes.len() < 5 + len {
        return Ok(None);
    }
    let command = bincode::deserialize(&bytes[5..5 + len])
        .map_err(|e| CommandParseError::Malformed(e.to_string()))?;
    Ok(Some((command, 5 + len)))
}

/// Encode a command as a binary frame.
pub fn to_binary(command: &BridgeCommand) -> Vec<u8> {
    let body = bincode::serialize(command).expect("command serialization cannot fail");
    let mut out = Vec::with_capacity(5 + body.len());
    out.extend_from_slice(&BINARY_COMMAND_MAGIC);
    out.push(COMMAND_VERSION);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend(body);
    out
}

/// Semantic validation applied after parsing, before rate limiting.
pub fn validate(command: &BridgeCommand) -> Result<(), NakReason> {
    match command {
        BridgeCommand::Engage { mode, heading } => {
            if !mode.is_engaged() {
                return Err(NakReason::BadMode);
            }
            if !(0.0..360.0).contains(heading) {
                return Err(NakReason::HeadingRange);
            }
            Ok(())
        }
        BridgeCommand::SetHeading { heading } => {
            if !(0.0..360.0).contains(heading) {
                return Err(NakReason::HeadingRange);
            }
            Ok(())
        }
        BridgeCommand::Standby | BridgeCommand::Disengage => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_roundtrip() {
        let commands = [
            BridgeCommand::Engage {
                mode: AutopilotMode::Auto,
                heading: 120.0,
            },
            BridgeCommand::SetHeading { heading: 95.5 },
            BridgeCommand::Standby,
            BridgeCommand::Disengage,
        ];
        for command in commands {
            let sentence = to_sentence(&command);
            assert!(is_command_sentence(&sentence));
            assert_eq!(parse_sentence(&sentence).unwrap(), command);
        }
    }

    #[test]
    fn binary_roundtrip() {
        let command = BridgeCommand::Engage {
            mode: AutopilotMode::Wind,
            heading: 42.0,
        };
        let bytes = to_binary(&command);
        assert!(is_command_binary(&bytes));
        let (parsed, consumed) = parse_binary(&bytes).unwrap().unwrap();
        assert_eq!(parsed, command);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn partial_binary_frame_waits_for_more() {
        let bytes = to_binary(&BridgeCommand::Disengage);
        assert_eq!(parse_binary(&bytes[..3]).unwrap(), None);
        assert_eq!(parse_binary(&bytes[..bytes.len() - 1]).unwrap(), None);
    }

    #[test]
    fn unknown_version_is_a_version_error() {
        let body = "PBRC,9,DISENGAGE";
        let sentence = format!("${}*{:02X}", body, checksum(body));
        let err = parse_sentence(&sentence).unwrap_err();
        assert_eq!(err, CommandParseError::Version(9));
        assert_eq!(err.nak_reason(), NakReason::Version);
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let mut sentence = to_sentence(&BridgeCommand::Standby);
        // Flip one checksum hex digit
        let star = sentence.rfind('*').unwrap();
        let mut bytes = sentence.clone().into_bytes();
        bytes[star + 1] = if bytes[star + 1] == b'0' { b'1' } else { b'0' };
        sentence = String::from_utf8(bytes).unwrap();
        assert_eq!(
            parse_sentence(&sentence).unwrap_err(),
            CommandParseError::Checksum
        );
    }

    #[test]
    fn validation_rejects_heading_out_of_range() {
        assert_eq!(
            validate(&BridgeCommand::SetHeading { heading: 360.0 }),
            Err(NakReason::HeadingRange)
        );
        assert_eq!(
            validate(&BridgeCommand::SetHeading { heading: -1.0 }),
            Err(NakReason::HeadingRange)
        );
        assert_eq!(validate(&BridgeCommand::SetHeading { heading: 0.0 }), Ok(()));
    }

    #[test]
    fn validation_rejects_non_engaging_modes() {
        assert_eq!(
            validate(&BridgeCommand::Engage {
                mode: AutopilotMode::Off,
                heading: 100.0
            }),
            Err(NakReason::BadMode)
        );
    }

    #[test]
    fn nak_reply_carries_reason_text() {
        let reply = CommandReply::Nak {
            reason: NakReason::RateLimited,
        };
        let sentence = reply.to_sentence();
        assert!(sentence.contains("NAK,rate limited"));
        crate::nmea0183::verify(&sentence).unwrap();
    }

    #[test]
    fn only_disengage_is_emergency() {
        assert!(BridgeCommand::Disengage.is_emergency());
        assert!(!BridgeCommand::Standby.is_emergency());
        assert!(!BridgeCommand::SetHeading { heading: 10.0 }.is_emergency());
    }
}
