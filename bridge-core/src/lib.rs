//! # Bridge Core
//!
//! Platform-independent telemetry, scenario and wire-encoding library for the
//! NMEA bridge simulator.
//!
//! This crate contains everything that does not need an async runtime or a
//! socket:
//!
//! - [`telemetry`] - instrument mnemonics, typed values and telemetry records
//! - [`pattern`] - the closed set of data-pattern functions driving telemetry
//! - [`scenario`] - declarative scenario definitions and their validation
//! - [`generator`] - per-tick telemetry production from the active patterns
//! - [`nmea0183`] - NMEA 0183 sentence assembly and checksum handling
//! - [`n2k`] - NMEA 2000 PGN payloads and the bridge's binary framing
//! - [`encoder`] - telemetry record to wire payload fan-out
//! - [`autopilot`] - autopilot command state and rate limiting
//! - [`command`] - the versioned bidirectional command frame codec
//!
//! The server crate (`bridge-server`) owns all I/O: listeners, the tick loop,
//! the REST control plane and session recording.

pub mod autopilot;
pub mod command;
pub mod encoder;
pub mod generator;
pub mod n2k;
pub mod nmea0183;
pub mod pattern;
pub mod scenario;
pub mod telemetry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire protocol spoken on the data ports, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WireProtocol {
    #[default]
    Nmea0183,
    Nmea2000,
}

impl std::fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nmea0183 => write!(f, "nmea0183"),
            Self::Nmea2000 => write!(f, "nmea2000"),
        }
    }
}

/// Synchronous validation failure. Raised when loading a scenario, parsing a
/// command or checking an injected sentence - never from the tick path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("pattern for '{0}': {1}")]
    Pattern(String, String),
    #[error("unknown instrument mnemonic '{0}'")]
    UnknownMnemonic(String),
    #[error("instance {0} out of range (0..=252)")]
    InstanceRange(u16),
    #[error("scenario '{0}' has no events")]
    EmptyScenario(String),
    #[error("scenario '{0}': event at {1}s is before preceding event")]
    EventOrder(String, f64),
    #[error("scenario '{0}': event at {1}s is past the {2}s duration")]
    EventPastEnd(String, f64, f64),
    #[error("scenario '{0}': duration must be positive")]
    Duration(String),
    #[error("malformed sentence: {0}")]
    Sentence(String),
}
