//! Telemetry record to wire payload fan-out.
//!
//! One [`TelemetryRecord`] expands to one sentence or PGN frame per reading
//! (per instance for engines, batteries and tanks), in the record's reading
//! order: engine, battery, tank, then navigation. Readings that cannot form a
//! complete sentence are dropped with a warning outcome rather than failing
//! the broadcast tick.

use crate::n2k;
use crate::nmea0183::{
    format_latitude, format_longitude, format_time_of_day, make_sentence,
};
use crate::telemetry::{Mnemonic, TelemetryRecord, Value};
use crate::WireProtocol;

/// Talker id used for navigation sentences.
const TALKER_GPS: &str = "GP";
/// Talker id used for instrument sentences.
const TALKER_INSTRUMENT: &str = "II";

/// A reading the encoder had to drop, with the reason. The server logs these.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeWarning {
    pub mnemonic: Mnemonic,
    pub reason: String,
}

impl std::fmt::Display for EncodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dropped {}: {}", self.mnemonic, self.reason)
    }
}

/// Serializes telemetry records for one wire protocol.
///
/// The encoder is deliberately stateless apart from its configuration, so the
/// instance-to-address mapping cannot drift between ticks.
#[derive(Debug, Clone)]
pub struct Encoder {
    protocol: WireProtocol,
    /// Unix ms at session start; record timestamps are relative to this.
    base_unix_ms: u64,
    /// Sequence id cycled through rapid-update PGNs.
    sid: u8,
}

impl Encoder {
    pub fn new(protocol: WireProtocol, base_unix_ms: u64) -> Self {
        Self {
            protocol,
            base_unix_ms,
            sid: 0,
        }
    }

    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Encode every reading of `record` into wire payloads.
    ///
    /// Returns the payloads in broadcast order plus warnings for any dropped
    /// readings. Never fails: a malformed reading costs only itself.
    pub fn encode(&mut self, record: &TelemetryRecord) -> (Vec<Vec<u8>>, Vec<EncodeWarning>) {
        let mut payloads = Vec::with_capacity(record.readings.len() + 2);
        let mut warnings = Vec::new();
        let sid = self.sid;
        self.sid = self.sid.wrapping_add(1);

        for (&mnemonic, value) in &record.readings {
            match self.encode_reading(record, mnemonic, value, sid) {
                Ok(Some(bytes)) => payloads.push(bytes),
                Ok(None) => {} // folded into another sentence (e.g. COG into RMC)
                Err(reason) => warnings.push(EncodeWarning { mnemonic, reason }),
            }
        }
        (payloads, warnings)
    }

    fn encode_reading(
        &self,
        record: &TelemetryRecord,
        mnemonic: Mnemonic,
        value: &Value,
        sid: u8,
    ) -> Result<Option<Vec<u8>>, String> {
        match self.protocol {
            WireProtocol::Nmea0183 => self.encode_0183(record, mnemonic, value),
            WireProtocol::Nmea2000 => self.encode_n2k(record, mnemonic, value, sid),
        }
    }

    fn scalar_of(value: &Value) -> Result<f64, String> {
        value
            .scalar()
            .ok_or_else(|| "expected scalar value".to_string())
    }

    fn encode_0183(
        &self,
        record: &TelemetryRecord,
        mnemonic: Mnemonic,
        value: &Value,
    ) -> Result<Option<Vec<u8>>, String> {
        let sentence = match mnemonic {
            Mnemonic::Position => {
                let (lat, lon) = match value {
                    Value::Position { lat, lon } => (*lat, *lon),
                    Value::Scalar(_) => return Err("position reading is scalar".to_string()),
                };
                let sog = record
                    .scalar(Mnemonic::Sog)
                    .ok_or_else(|| "RMC requires SOG".to_string())?;
                let cog = record
                    .scalar(Mnemonic::Cog)
                    .ok_or_else(|| "RMC requires COG".to_string())?;
                let (lat_field, lat_hemi) = format_latitude(lat);
                let (lon_field, lon_hemi) = format_longitude(lon);
                let time = format_time_of_day(self.base_unix_ms + record.timestamp_ms);
                make_sentence(
                    TALKER_GPS,
                    "RMC",
                    &[
                        time,
                        "A".to_string(),
                        lat_field,
                        lat_hemi.to_string(),
                        lon_field,
                        lon_hemi.to_string(),
                        format!("{:05.1}", sog),
                        format!("{:05.1}", cog),
                        String::new(), // date left empty, virtual clock has no calendar
                        String::new(),
                        String::new(),
                    ],
                )
            }
            // SOG and COG ride inside RMC
            Mnemonic::Sog | Mnemonic::Cog => return Ok(None),
            Mnemonic::Heading => {
                let heading = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "HDT",
                    &[format!("{:.1}", heading), "T".to_string()],
                )
            }
            Mnemonic::Stw => {
                let stw = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "VHW",
                    &[
                        String::new(),
                        "T".to_string(),
                        String::new(),
                        "M".to_string(),
                        format!("{:.1}", stw),
                        "N".to_string(),
                        format!("{:.1}", stw * 1.852),
                        "K".to_string(),
                    ],
                )
            }
            Mnemonic::Depth => {
                let depth = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "DPT",
                    &[format!("{:.1}", depth), "0.0".to_string()],
                )
            }
            Mnemonic::Awa => {
                let angle = Self::scalar_of(value)?;
                let speed = record
                    .scalar(Mnemonic::Aws)
                    .ok_or_else(|| "MWV requires AWS".to_string())?;
                // MWV wants 0..360 clockwise from the bow
                let angle = if angle < 0.0 { angle + 360.0 } else { angle };
                make_sentence(
                    TALKER_INSTRUMENT,
                    "MWV",
                    &[
                        format!("{:.1}", angle),
                        "R".to_string(),
                        format!("{:.1}", speed),
                        "N".to_string(),
                        "A".to_string(),
                    ],
                )
            }
            // AWS rides inside MWV
            Mnemonic::Aws => return Ok(None),
            Mnemonic::EngineRpm(instance) => {
                let rpm = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "RPM",
                    &[
                        "E".to_string(),
                        instance.to_string(),
                        format!("{:.1}", rpm),
                        String::new(),
                        "A".to_string(),
                    ],
                )
            }
            Mnemonic::BatteryVolts(instance) => {
                let volts = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "XDR",
                    &[
                        "U".to_string(),
                        format!("{:.2}", volts),
                        "V".to_string(),
                        format!("BATT{}", instance),
                    ],
                )
            }
            Mnemonic::FuelLevel(instance) => {
                let level = Self::scalar_of(value)?;
                make_sentence(
                    TALKER_INSTRUMENT,
                    "XDR",
                    &[
                        "V".to_string(),
                        format!("{:.1}", level),
                        "P".to_string(),
                        format!("FUEL{}", instance),
                    ],
                )
            }
        };
        Ok(Some(sentence.into_bytes()))
    }

    fn encode_n2k(
        &self,
        record: &TelemetryRecord,
        mnemonic: Mnemonic,
        value: &Value,
        sid: u8,
    ) -> Result<Option<Vec<u8>>, String> {
        let frame = match mnemonic {
            Mnemonic::Position => {
                let (lat, lon) = match value {
                    Value::Position { lat, lon } => (*lat, *lon),
                    Value::Scalar(_) => return Err("position reading is scalar".to_string()),
                };
                n2k::position_rapid(lat, lon)
            }
            Mnemonic::Sog => {
                let sog = Self::scalar_of(value)?;
                let cog = record
                    .scalar(Mnemonic::Cog)
                    .ok_or_else(|| "PGN 129026 requires COG".to_string())?;
                n2k::cog_sog_rapid(sid, cog, sog)
            }
            // COG rides inside PGN 129026
            Mnemonic::Cog => return Ok(None),
            Mnemonic::Heading => n2k::vessel_heading(sid, Self::scalar_of(value)?),
            // No dedicated STW rapid PGN in the emitted set
            Mnemonic::Stw => return Ok(None),
            Mnemonic::Depth => n2k::water_depth(sid, Self::scalar_of(value)?),
            Mnemonic::Awa => {
                let angle = Self::scalar_of(value)?;
                let speed = record
                    .scalar(Mnemonic::Aws)
                    .ok_or_else(|| "PGN 130306 requires AWS".to_string())?;
                n2k::wind_data(sid, speed, angle)
            }
            Mnemonic::Aws => return Ok(None),
            Mnemonic::EngineRpm(instance) => n2k::engine_rapid(instance, Self::scalar_of(value)?),
            Mnemonic::BatteryVolts(instance) => {
                n2k::battery_status(sid, instance, Self::scalar_of(value)?)
            }
            Mnemonic::FuelLevel(instance) => n2k::fluid_level(instance, Self::scalar_of(value)?),
        };
        Ok(Some(frame.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea0183::verify;

    fn nav_record() -> TelemetryRecord {
        let mut record = TelemetryRecord::new(45_319_000);
        record.insert(
            Mnemonic::Position,
            Value::Position {
                lat: 48.1173,
                lon: 11.5167,
            },
        );
        record.insert(Mnemonic::Sog, Value::Scalar(6.2));
        record.insert(Mnemonic::Cog, Value::Scalar(84.4));
        record.insert(Mnemonic::Heading, Value::Scalar(85.0));
        record.insert(Mnemonic::Depth, Value::Scalar(23.4));
        record.insert(Mnemonic::EngineRpm(0), Value::Scalar(2400.0));
        record.insert(Mnemonic::EngineRpm(1), Value::Scalar(2450.0));
        record.insert(Mnemonic::BatteryVolts(0), Value::Scalar(13.8));
        record.insert(Mnemonic::FuelLevel(0), Value::Scalar(72.0));
        record
    }

    #[test]
    fn all_generated_sentences_verify() {
        let mut encoder = Encoder::new(WireProtocol::Nmea0183, 0);
        let (payloads, warnings) = encoder.encode(&nav_record());
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert!(!payloads.is_empty());
        for payload in &payloads {
            let sentence = std::str::from_utf8(payload).unwrap();
            verify(sentence).unwrap_or_else(|e| panic!("bad sentence {:?}: {}", sentence, e));
        }
    }

    #[test]
    fn broadcast_order_is_engine_battery_tank_nav() {
        let mut encoder = Encoder::new(WireProtocol::Nmea0183, 0);
        let (payloads, _) = encoder.encode(&nav_record());
        let kinds: Vec<String> = payloads
            .iter()
            .map(|p| {
                let s = std::str::from_utf8(p).unwrap();
                s[1..6].to_string()
            })
            .collect();
        // Two engines, one battery, one tank, then navigation sentences
        assert_eq!(kinds[0], "IIRPM");
        assert_eq!(kinds[1], "IIRPM");
        assert_eq!(kinds[2], "IIXDR");
        assert_eq!(kinds[3], "IIXDR");
        assert_eq!(kinds[4], "GPRMC");
    }

    #[test]
    fn engine_instances_stay_isolated() {
        let mut encoder = Encoder::new(WireProtocol::Nmea0183, 0);
        for _ in 0..1000 {
            let (payloads, _) = encoder.encode(&nav_record());
            let rpm: Vec<&str> = payloads
                .iter()
                .filter_map(|p| std::str::from_utf8(p).ok())
                .filter(|s| s.starts_with("$IIRPM"))
                .collect();
            assert_eq!(rpm.len(), 2);
            assert!(rpm[0].contains(",E,0,2400.0,"));
            assert!(rpm[1].contains(",E,1,2450.0,"));
        }
    }

    #[test]
    fn missing_companion_field_drops_with_warning() {
        let mut record = TelemetryRecord::new(0);
        record.insert(
            Mnemonic::Position,
            Value::Position {
                lat: 10.0,
                lon: 10.0,
            },
        );
        // No SOG/COG: RMC cannot form
        let mut encoder = Encoder::new(WireProtocol::Nmea0183, 0);
        let (payloads, warnings) = encoder.encode(&record);
        assert!(payloads.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].mnemonic, Mnemonic::Position);
    }

    #[test]
    fn n2k_mode_emits_parseable_frames() {
        let mut encoder = Encoder::new(WireProtocol::Nmea2000, 0);
        let (payloads, warnings) = encoder.encode(&nav_record());
        assert!(warnings.is_empty());
        for payload in &payloads {
            let (_, consumed) = crate::n2k::Frame::parse(payload).unwrap();
            assert_eq!(consumed, payload.len());
        }
    }

    #[test]
    fn n2k_engine_instances_map_to_distinct_sources() {
        let mut encoder = Encoder::new(WireProtocol::Nmea2000, 0);
        let (payloads, _) = encoder.encode(&nav_record());
        let engine_sources: Vec<u8> = payloads
            .iter()
            .filter_map(|p| crate::n2k::Frame::parse(p).ok())
            .map(|(f, _)| f)
            .filter(|f| f.pgn == crate::n2k::PGN_ENGINE_RAPID)
            .map(|f| f.source)
            .collect();
        assert_eq!(engine_sources.len(), 2);
        assert_ne!(engine_sources[0], engine_sources[1]);
    }
}
