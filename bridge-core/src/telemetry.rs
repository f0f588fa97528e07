//! Instrument mnemonics, typed values and telemetry records.
//!
//! A [`TelemetryRecord`] is the structured, wire-format independent output of
//! one generator tick: a map from instrument mnemonic to value, stamped with
//! the session-monotonic timestamp. Instance-indexed instruments (engines,
//! batteries, tanks) carry their NMEA instance id so multiple physical units
//! stay distinguishable all the way to the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// Highest valid NMEA device instance.
pub const MAX_INSTANCE: u8 = 252;

/// An instrument identifier.
///
/// The variant order is deliberate: records iterate their readings in
/// `Ord` order, which gives the broadcast ordering engine, battery, tank,
/// then navigation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mnemonic {
    /// Engine revolutions, rpm.
    EngineRpm(u8),
    /// Battery terminal voltage, volts.
    BatteryVolts(u8),
    /// Fuel tank level, percent full.
    FuelLevel(u8),
    /// Vessel position.
    Position,
    /// Speed over ground, knots.
    Sog,
    /// Course over ground, degrees true.
    Cog,
    /// Heading, degrees true.
    Heading,
    /// Speed through water, knots.
    Stw,
    /// Depth below transducer, meters.
    Depth,
    /// Apparent wind angle, degrees relative to bow.
    Awa,
    /// Apparent wind speed, knots.
    Aws,
}

impl Mnemonic {
    /// Device instance for instanced instruments.
    pub fn instance(&self) -> Option<u8> {
        match self {
            Mnemonic::EngineRpm(i) | Mnemonic::BatteryVolts(i) | Mnemonic::FuelLevel(i) => Some(*i),
            _ => None,
        }
    }

    /// The physically valid range for scalar readings of this instrument.
    ///
    /// Heading-like angles are not listed here; they wrap rather than clamp,
    /// see [`wrap_degrees`].
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            Mnemonic::EngineRpm(_) => (0.0, 10_000.0),
            Mnemonic::BatteryVolts(_) => (0.0, 60.0),
            Mnemonic::FuelLevel(_) => (0.0, 100.0),
            Mnemonic::Sog | Mnemonic::Stw => (0.0, 100.0),
            Mnemonic::Aws => (0.0, 200.0),
            Mnemonic::Depth => (0.0, 12_000.0),
            Mnemonic::Cog | Mnemonic::Heading => (0.0, 360.0),
            Mnemonic::Awa => (-180.0, 180.0),
            Mnemonic::Position => (-90.0, 90.0),
        }
    }

    /// True for angles that wrap modulo 360 instead of clamping.
    pub fn wraps(&self) -> bool {
        matches!(self, Mnemonic::Cog | Mnemonic::Heading)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mnemonic::EngineRpm(i) => write!(f, "ENGINE_RPM[{}]", i),
            Mnemonic::BatteryVolts(i) => write!(f, "BATTERY_VOLTS[{}]", i),
            Mnemonic::FuelLevel(i) => write!(f, "FUEL_LEVEL[{}]", i),
            Mnemonic::Position => write!(f, "POSITION"),
            Mnemonic::Sog => write!(f, "SOG"),
            Mnemonic::Cog => write!(f, "COG"),
            Mnemonic::Heading => write!(f, "HDG"),
            Mnemonic::Stw => write!(f, "STW"),
            Mnemonic::Depth => write!(f, "DEPTH"),
            Mnemonic::Awa => write!(f, "AWA"),
            Mnemonic::Aws => write!(f, "AWS"),
        }
    }
}

impl FromStr for Mnemonic {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Instanced form: NAME[n]
        if let Some(open) = s.find('[') {
            let close = s
                .rfind(']')
                .ok_or_else(|| ValidationError::UnknownMnemonic(s.to_string()))?;
            let name = &s[..open];
            let instance: u16 = s[open + 1..close]
                .parse()
                .map_err(|_| ValidationError::UnknownMnemonic(s.to_string()))?;
            if instance > MAX_INSTANCE as u16 {
                return Err(ValidationError::InstanceRange(instance));
            }
            let instance = instance as u8;
            return match name {
                "ENGINE_RPM" => Ok(Mnemonic::EngineRpm(instance)),
                "BATTERY_VOLTS" => Ok(Mnemonic::BatteryVolts(instance)),
                "FUEL_LEVEL" => Ok(Mnemonic::FuelLevel(instance)),
                _ => Err(ValidationError::UnknownMnemonic(s.to_string())),
            };
        }
        match s {
            "POSITION" => Ok(Mnemonic::Position),
            "SOG" => Ok(Mnemonic::Sog),
            "COG" => Ok(Mnemonic::Cog),
            "HDG" => Ok(Mnemonic::Heading),
            "STW" => Ok(Mnemonic::Stw),
            "DEPTH" => Ok(Mnemonic::Depth),
            "AWA" => Ok(Mnemonic::Awa),
            "AWS" => Ok(Mnemonic::Aws),
            // Un-instanced shorthand addresses instance 0
            "ENGINE_RPM" => Ok(Mnemonic::EngineRpm(0)),
            "BATTERY_VOLTS" => Ok(Mnemonic::BatteryVolts(0)),
            "FUEL_LEVEL" => Ok(Mnemonic::FuelLevel(0)),
            _ => Err(ValidationError::UnknownMnemonic(s.to_string())),
        }
    }
}

impl Serialize for Mnemonic {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mnemonic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Mnemonic::from_str(&s).map_err(de::Error::custom)
    }
}

/// A single instrument reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Position { lat: f64, lon: f64 },
}

impl Value {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Position { .. } => None,
        }
    }
}

/// Wrap an angle into [0, 360).
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid(360.0) of e.g. -1e-13 yields exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Clamp a reading into its instrument's physical range.
///
/// Returns the in-range value plus whether clamping (or wrapping) changed it,
/// so the caller can log generation errors without failing the tick.
pub fn clamp_to_range(mnemonic: Mnemonic, value: f64) -> (f64, bool) {
    if mnemonic.wraps() {
        let wrapped = wrap_degrees(value);
        return (wrapped, (wrapped - value).abs() > f64::EPSILON);
    }
    let (min, max) = mnemonic.valid_range();
    let clamped = value.clamp(min, max);
    (clamped, clamped != value)
}

/// One tick's worth of telemetry, independent of wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Milliseconds since session start. Monotonically non-decreasing across
    /// the whole session, including scenario loops.
    pub timestamp_ms: u64,
    /// Readings in `Mnemonic` order: engine, battery, tank, then navigation.
    pub readings: BTreeMap<Mnemonic, Value>,
}

impl TelemetryRecord {
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            readings: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, mnemonic: Mnemonic, value: Value) {
        self.readings.insert(mnemonic, value);
    }

    pub fn get(&self, mnemonic: Mnemonic) -> Option<&Value> {
        self.readings.get(&mnemonic)
    }

    pub fn scalar(&self, mnemonic: Mnemonic) -> Option<f64> {
        self.readings.get(&mnemonic).and_then(Value::scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_roundtrip() {
        for s in ["SOG", "HDG", "DEPTH", "ENGINE_RPM[2]", "FUEL_LEVEL[0]"] {
            let m = Mnemonic::from_str(s).unwrap();
            assert_eq!(m.to_string(), s);
        }
    }

    #[test]
    fn uninstanced_shorthand_is_instance_zero() {
        assert_eq!(
            Mnemonic::from_str("ENGINE_RPM").unwrap(),
            Mnemonic::EngineRpm(0)
        );
    }

    #[test]
    fn instance_range_is_enforced() {
        assert!(matches!(
            Mnemonic::from_str("ENGINE_RPM[253]"),
            Err(ValidationError::InstanceRange(253))
        ));
        assert!(Mnemonic::from_str("ENGINE_RPM[252]").is_ok());
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        assert!(Mnemonic::from_str("WARP_FACTOR").is_err());
        assert!(Mnemonic::from_str("SOG[1]").is_err());
    }

    #[test]
    fn wrap_degrees_stays_in_range() {
        assert_eq!(wrap_degrees(0.0), 0.0);
        assert_eq!(wrap_degrees(360.0), 0.0);
        assert_eq!(wrap_degrees(-10.0), 350.0);
        assert_eq!(wrap_degrees(725.0), 5.0);
    }

    #[test]
    fn clamp_reports_out_of_range() {
        let (v, clamped) = clamp_to_range(Mnemonic::Depth, -3.0);
        assert_eq!(v, 0.0);
        assert!(clamped);

        let (v, clamped) = clamp_to_range(Mnemonic::Depth, 12.5);
        assert_eq!(v, 12.5);
        assert!(!clamped);
    }

    #[test]
    fn readings_iterate_engine_battery_tank_nav() {
        let mut record = TelemetryRecord::new(0);
        record.insert(Mnemonic::Heading, Value::Scalar(90.0));
        record.insert(Mnemonic::FuelLevel(0), Value::Scalar(80.0));
        record.insert(Mnemonic::EngineRpm(0), Value::Scalar(1500.0));
        record.insert(Mnemonic::BatteryVolts(0), Value::Scalar(12.6));

        let order: Vec<Mnemonic> = record.readings.keys().copied().collect();
        assert_eq!(
            order,
            vec![
                Mnemonic::EngineRpm(0),
                Mnemonic::BatteryVolts(0),
                Mnemonic::FuelLevel(0),
                Mnemonic::Heading,
            ]
        );
    }
}
