//! NMEA 2000 PGN payloads and the bridge's binary framing.
//!
//! PGN payloads follow the standard little-endian fixed-point layouts
//! (positions in 1e-7 degrees, angles in 1e-4 radians, speeds in 0.01 m/s).
//! The frame wrapper is the bridge's own: unlike the CAN bus itself, a WiFi
//! bridge stream needs self-describing boundaries, so every frame is
//!
//! ```text
//! +------+----------+-----------+--------+-----+---------+----------+
//! | 0xA5 | priority | pgn (3LE) | source | len | payload | checksum |
//! +------+----------+-----------+--------+-----+---------+----------+
//! ```
//!
//! with the checksum the XOR of every byte after the sync up to and including
//! the payload.

use crate::ValidationError;

/// Frame sync byte.
pub const SYNC: u8 = 0xA5;

/// Fixed source address for navigation-sourced PGNs.
pub const SOURCE_NAV: u8 = 0x01;
/// Source address base for engine instances.
pub const SOURCE_ENGINE_BASE: u8 = 0x20;
/// Source address base for battery instances.
pub const SOURCE_BATTERY_BASE: u8 = 0x30;
/// Source address base for tank instances.
pub const SOURCE_TANK_BASE: u8 = 0x40;

pub const PGN_POSITION_RAPID: u32 = 129025;
pub const PGN_COG_SOG_RAPID: u32 = 129026;
pub const PGN_VESSEL_HEADING: u32 = 127250;
pub const PGN_WATER_DEPTH: u32 = 128267;
pub const PGN_WIND_DATA: u32 = 130306;
pub const PGN_ENGINE_RAPID: u32 = 127488;
pub const PGN_BATTERY_STATUS: u32 = 127508;
pub const PGN_FLUID_LEVEL: u32 = 127505;

const KNOTS_TO_MS: f64 = 0.514444;

/// One PGN frame ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(priority: u8, pgn: u32, source: u8, payload: Vec<u8>) -> Self {
        Self {
            priority,
            pgn,
            source,
            payload,
        }
    }

    /// Serialize with sync, header, payload and trailing checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.push(SYNC);
        out.push(self.priority);
        out.extend_from_slice(&self.pgn.to_le_bytes()[..3]);
        out.push(self.source);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        let checksum = out[1..].iter().fold(0u8, |acc, b| acc ^ b);
        out.push(checksum);
        out
    }

    /// Parse one frame from a byte slice, returning it plus bytes consumed.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        if bytes.len() < 8 {
            return Err(ValidationError::Sentence("frame too short".to_string()));
        }
        if bytes[0] != SYNC {
            return Err(ValidationError::Sentence(format!(
                "bad sync byte {:02X}",
                bytes[0]
            )));
        }
        let priority = bytes[1];
        let pgn = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], 0]);
        let source = bytes[5];
        let len = bytes[6] as usize;
        let total = 7 + len + 1;
        if bytes.len() < total {
            return Err(ValidationError::Sentence("truncated frame".to_string()));
        }
        let payload = bytes[7..7 + len].to_vec();
        let expected = bytes[1..7 + len].iter().fold(0u8, |acc, b| acc ^ b);
        if expected != bytes[7 + len] {
            return Err(ValidationError::Sentence(format!(
                "frame checksum mismatch: computed {:02X}, frame says {:02X}",
                expected,
                bytes[7 + len]
            )));
        }
        Ok((
            Self {
                priority,
                pgn,
                source,
                payload,
            },
            total,
        ))
    }
}

fn deg_to_angle_u16(deg: f64) -> u16 {
    (deg.to_radians() * 10_000.0).round().clamp(0.0, u16::MAX as f64) as u16
}

fn knots_to_speed_u16(knots: f64) -> u16 {
    (knots * KNOTS_TO_MS * 100.0)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16
}

/// PGN 129025 - Position, Rapid Update.
pub fn position_rapid(lat: f64, lon: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&((lat * 1e7).round() as i32).to_le_bytes());
    payload.extend_from_slice(&((lon * 1e7).round() as i32).to_le_bytes());
    Frame::new(2, PGN_POSITION_RAPID, SOURCE_NAV, payload)
}

/// PGN 129026 - COG & SOG, Rapid Update. COG reference is true.
pub fn cog_sog_rapid(sid: u8, cog_deg: f64, sog_knots: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push(sid);
    payload.push(0x00); // reference: true north
    payload.extend_from_slice(&deg_to_angle_u16(cog_deg).to_le_bytes());
    payload.extend_from_slice(&knots_to_speed_u16(sog_knots).to_le_bytes());
    payload.extend_from_slice(&[0xFF, 0xFF]); // reserved
    Frame::new(2, PGN_COG_SOG_RAPID, SOURCE_NAV, payload)
}

/// PGN 127250 - Vessel Heading, true reference.
pub fn vessel_heading(sid: u8, heading_deg: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push(sid);
    payload.extend_from_slice(&deg_to_angle_u16(heading_deg).to_le_bytes());
    payload.extend_from_slice(&0x7FFFi16.to_le_bytes()); // deviation: not available
    payload.extend_from_slice(&0x7FFFi16.to_le_bytes()); // variation: not available
    payload.push(0x00); // reference: true
    Frame::new(2, PGN_VESSEL_HEADING, SOURCE_NAV, payload)
}

/// PGN 128267 - Water Depth below transducer.
pub fn water_depth(sid: u8, depth_m: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push(sid);
    payload.extend_from_slice(&((depth_m * 100.0).round().max(0.0) as u32).to_le_bytes());
    payload.extend_from_slice(&0i16.to_le_bytes()); // transducer offset
    payload.push(0xFF); // max range: not available
    Frame::new(3, PGN_WATER_DEPTH, SOURCE_NAV, payload)
}

const WIND_REFERENCE_APPARENT: u8 = 2;

/// PGN 130306 - Wind Data, apparent reference.
///
/// `angle_deg` is relative to the bow in [-180, 180); negative is to port and
/// encodes as its positive wrap.
pub fn wind_data(sid: u8, speed_knots: f64, angle_deg: f64) -> Frame {
    let angle = if angle_deg < 0.0 {
        angle_deg + 360.0
    } else {
        angle_deg
    };
    let mut payload = Vec::with_capacity(8);
    payload.push(sid);
    payload.extend_from_slice(&knots_to_speed_u16(speed_knots).to_le_bytes());
    payload.extend_from_slice(&deg_to_angle_u16(angle).to_le_bytes());
    payload.push(WIND_REFERENCE_APPARENT);
    payload.extend_from_slice(&[0xFF, 0xFF]); // reserved
    Frame::new(2, PGN_WIND_DATA, SOURCE_NAV, payload)
}

/// PGN 127488 - Engine Parameters, Rapid Update.
pub fn engine_rapid(instance: u8, rpm: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push(instance);
    payload.extend_from_slice(&((rpm * 4.0).round().clamp(0.0, u16::MAX as f64) as u16).to_le_bytes());
    payload.extend_from_slice(&[0xFF, 0xFF]); // boost pressure: not available
    payload.push(0x7F); // tilt/trim: not available
    payload.extend_from_slice(&[0xFF, 0xFF]); // reserved
    Frame::new(2, PGN_ENGINE_RAPID, SOURCE_ENGINE_BASE + instance, payload)
}

/// PGN 127508 - Battery Status.
pub fn battery_status(sid: u8, instance: u8, volts: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push(instance);
    payload.extend_from_slice(&((volts * 100.0).round().clamp(0.0, u16::MAX as f64) as u16).to_le_bytes());
    payload.extend_from_slice(&0x7FFFi16.to_le_bytes()); // current: not available
    payload.extend_from_slice(&[0xFF, 0xFF]); // temperature: not available
    payload.push(sid);
    Frame::new(6, PGN_BATTERY_STATUS, SOURCE_BATTERY_BASE + instance, payload)
}

const FLUID_TYPE_FUEL: u8 = 0;

/// PGN 127505 - Fluid Level (fuel), `level_pct` in [0, 100].
pub fn fluid_level(instance: u8, level_pct: f64) -> Frame {
    let mut payload = Vec::with_capacity(8);
    payload.push((FLUID_TYPE_FUEL << 4) | (instance & 0x0F));
    payload.extend_from_slice(&((level_pct / 0.004).round().clamp(0.0, i16::MAX as f64) as i16).to_le_bytes());
    payload.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // capacity: not available
    payload.push(0xFF); // reserved
    Frame::new(6, PGN_FLUID_LEVEL, SOURCE_TANK_BASE + instance, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = engine_rapid(1, 2400.0);
        let bytes = frame.to_bytes();
        let (parsed, consumed) = Frame::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, frame);
    }

    #[test]
    fn corrupt_checksum_rejected() {
        let mut bytes = water_depth(0, 12.0).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(Frame::parse(&bytes).is_err());
    }

    #[test]
    fn position_scaling() {
        let frame = position_rapid(47.7223, -4.0022);
        assert_eq!(frame.pgn, PGN_POSITION_RAPID);
        let lat = i32::from_le_bytes(frame.payload[0..4].try_into().unwrap());
        let lon = i32::from_le_bytes(frame.payload[4..8].try_into().unwrap());
        assert_eq!(lat, 477_223_000);
        assert_eq!(lon, -40_022_000);
    }

    #[test]
    fn engine_rpm_quarter_resolution() {
        let frame = engine_rapid(0, 2000.0);
        let raw = u16::from_le_bytes(frame.payload[1..3].try_into().unwrap());
        assert_eq!(raw, 8000);
    }

    #[test]
    fn instances_map_to_distinct_sources() {
        assert_ne!(engine_rapid(0, 1000.0).source, engine_rapid(1, 1000.0).source);
        assert_eq!(engine_rapid(2, 1000.0).source, SOURCE_ENGINE_BASE + 2);
        assert_eq!(battery_status(0, 1, 12.0).source, SOURCE_BATTERY_BASE + 1);
    }

    #[test]
    fn instance_source_mapping_is_stable_across_frames() {
        for _ in 0..10 {
            assert_eq!(engine_rapid(1, 1500.0).source, SOURCE_ENGINE_BASE + 1);
        }
    }

    #[test]
    fn fluid_level_packs_instance_and_type() {
        let frame = fluid_level(3, 50.0);
        assert_eq!(frame.payload[0] & 0x0F, 3);
        let raw = i16::from_le_bytes(frame.payload[1..3].try_into().unwrap());
        assert_eq!(raw, 12500);
    }

    #[test]
    fn heading_angle_in_radians_1e4() {
        let frame = vessel_heading(0, 90.0);
        let raw = u16::from_le_bytes(frame.payload[1..3].try_into().unwrap());
        // pi/2 * 1e4
        assert_eq!(raw, 15708);
    }
}
