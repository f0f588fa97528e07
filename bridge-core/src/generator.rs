//! Per-tick telemetry production.
//!
//! The generator owns the active pattern states and produces one
//! [`TelemetryRecord`] per virtual-clock tick. Scenario events install or
//! replace patterns; the autopilot state overrides heading generation while
//! engaged; a GPS dropout masks position output. Ticking never fails -
//! out-of-range samples are clamped and reported as warnings.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::autopilot::{converge_heading, AutopilotState};
use crate::pattern::{PatternSpec, PatternState};
use crate::scenario::{ScenarioEvent, StateTransition};
use crate::telemetry::{clamp_to_range, Mnemonic, TelemetryRecord, Value};

/// Default vessel start position (Oslofjord).
const START_LAT: f64 = 59.0139;
const START_LON: f64 = 10.6839;

/// A sample the generator had to clamp into range. The server logs these.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationWarning {
    pub mnemonic: Mnemonic,
    pub raw: f64,
    pub clamped: f64,
}

impl std::fmt::Display for GenerationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} out of range: {} clamped to {}",
            self.mnemonic, self.raw, self.clamped
        )
    }
}

/// Produces telemetry records from the active pattern set.
#[derive(Debug)]
pub struct Generator {
    seed: u64,
    states: BTreeMap<Mnemonic, PatternState>,
    gps_dropout: bool,
    /// Smoothed vessel heading carried across ticks for autopilot convergence.
    heading: f64,
    /// Dead-reckoned position advanced from SOG/COG each tick.
    lat: f64,
    lon: f64,
}

impl Generator {
    /// An empty generator; patterns arrive via scenario events.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            states: BTreeMap::new(),
            gps_dropout: false,
            heading: 0.0,
            lat: START_LAT,
            lon: START_LON,
        }
    }

    /// A generator pre-loaded with the free-running baseline patterns, used
    /// when no scenario is active.
    pub fn with_defaults(seed: u64) -> Self {
        let mut generator = Self::new(seed);
        for (key, spec) in default_patterns() {
            generator.install(&key, spec);
        }
        generator
    }

    /// Install or replace the pattern for one instrument.
    ///
    /// The per-instrument RNG seed mixes the session seed with the mnemonic,
    /// so instruments are decorrelated but the whole session reproduces from
    /// one seed.
    fn install(&mut self, key: &str, spec: PatternSpec) {
        // Keys are validated at scenario load; unknown ones cannot reach here.
        let Ok(mnemonic) = Mnemonic::from_str(key) else {
            return;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let seed = self.seed ^ hasher.finish();
        if let PatternSpec::Constant { value } = spec {
            if mnemonic == Mnemonic::Heading {
                self.heading = value;
            }
        }
        self.states.insert(mnemonic, PatternState::new(spec, seed));
    }

    /// Apply a scenario event: install its patterns, return its transition
    /// for the engine to act on.
    pub fn apply_event(&mut self, event: &ScenarioEvent) -> Option<StateTransition> {
        for (key, spec) in &event.patterns {
            self.install(key, spec.clone());
        }
        event.transition.clone()
    }

    /// Set or clear the GPS dropout mask.
    pub fn set_gps_dropout(&mut self, dropout: bool) {
        self.gps_dropout = dropout;
    }

    pub fn gps_dropout(&self) -> bool {
        self.gps_dropout
    }

    /// Release all pattern accumulators (scenario stop).
    pub fn reset(&mut self) {
        self.states.clear();
        self.gps_dropout = false;
    }

    /// Produce the record for virtual time `t`.
    ///
    /// `dt` is the virtual seconds since the previous tick (zero on the first
    /// tick and across loop wraps); `session_ms` is the session-monotonic
    /// timestamp for the record. Never fails.
    pub fn tick(
        &mut self,
        t: f64,
        dt: f64,
        session_ms: u64,
        autopilot: &AutopilotState,
    ) -> (TelemetryRecord, Vec<GenerationWarning>) {
        let mut record = TelemetryRecord::new(session_ms);
        let mut warnings = Vec::new();

        for (&mnemonic, state) in &mut self.states {
            let raw = state.sample(t);
            let (value, was_clamped) = clamp_to_range(mnemonic, raw);
            if was_clamped {
                warnings.push(GenerationWarning {
                    mnemonic,
                    raw,
                    clamped: value,
                });
            }
            record.insert(mnemonic, Value::Scalar(value));
        }

        // Autopilot coupling: while engaged, heading converges toward the
        // target at a bounded turn rate instead of following its pattern.
        if autopilot.mode.is_engaged() {
            self.heading = converge_heading(self.heading, autopilot.target_heading, dt);
            record.insert(Mnemonic::Heading, Value::Scalar(self.heading));
            // The vessel actually turns, so ground track follows
            if record.get(Mnemonic::Cog).is_some() {
                record.insert(Mnemonic::Cog, Value::Scalar(self.heading));
            }
        } else if let Some(h) = record.scalar(Mnemonic::Heading) {
            self.heading = h;
        }

        // Dead-reckon position from SOG/COG
        if let (Some(sog), Some(cog)) = (record.scalar(Mnemonic::Sog), record.scalar(Mnemonic::Cog))
        {
            let distance_nm = sog * dt / 3600.0;
            let course = cog.to_radians();
            self.lat += distance_nm * course.cos() / 60.0;
            self.lon += distance_nm * course.sin() / (60.0 * self.lat.to_radians().cos().max(0.01));
        }

        if self.gps_dropout {
            record.readings.remove(&Mnemonic::Position);
            record.readings.remove(&Mnemonic::Sog);
            record.readings.remove(&Mnemonic::Cog);
        } else if record.get(Mnemonic::Sog).is_some() {
            record.insert(
                Mnemonic::Position,
                Value::Position {
                    lat: self.lat,
                    lon: self.lon,
                },
            );
        }

        (record, warnings)
    }
}

/// Free-running baseline: plausible telemetry for every instrument the
/// simulator knows, used when no scenario drives the generator.
pub fn default_patterns() -> Vec<(String, PatternSpec)> {
    vec![
        (
            "SOG".to_string(),
            PatternSpec::Sine {
                amplitude: 0.5,
                period: 90.0,
                phase: 0.0,
                offset: 5.8,
            },
        ),
        (
            "COG".to_string(),
            PatternSpec::RandomWalk {
                start: 95.0,
                step: 0.4,
                min: 85.0,
                max: 105.0,
            },
        ),
        (
            "HDG".to_string(),
            PatternSpec::RandomWalk {
                start: 96.0,
                step: 0.4,
                min: 85.0,
                max: 105.0,
            },
        ),
        (
            "STW".to_string(),
            PatternSpec::Sine {
                amplitude: 0.4,
                period: 75.0,
                phase: 1.0,
                offset: 5.6,
            },
        ),
        (
            "DEPTH".to_string(),
            PatternSpec::RandomWalk {
                start: 31.0,
                step: 0.5,
                min: 5.0,
                max: 120.0,
            },
        ),
        (
            "AWA".to_string(),
            PatternSpec::GaussianNoise {
                mean: -40.0,
                stddev: 5.0,
            },
        ),
        (
            "AWS".to_string(),
            PatternSpec::GaussianNoise {
                mean: 12.0,
                stddev: 2.0,
            },
        ),
        (
            "ENGINE_RPM[0]".to_string(),
            PatternSpec::GaussianNoise {
                mean: 2200.0,
                stddev: 30.0,
            },
        ),
        (
            "BATTERY_VOLTS[0]".to_string(),
            PatternSpec::GaussianNoise {
                mean: 13.6,
                stddev: 0.05,
            },
        ),
        (
            "FUEL_LEVEL[0]".to_string(),
            PatternSpec::RandomWalk {
                start: 64.0,
                step: 0.01,
                min: 0.0,
                max: 100.0,
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::AutopilotMode;

    fn free_running() -> Generator {
        Generator::with_defaults(1234)
    }

    #[test]
    fn headings_stay_in_range_over_long_run() {
        let mut generator = free_running();
        let autopilot = AutopilotState::default();
        // 10 simulated minutes at 10 Hz
        for i in 0..6000 {
            let t = i as f64 * 0.1;
            let (record, _) = generator.tick(t, 0.1, (t * 1000.0) as u64, &autopilot);
            let heading = record.scalar(Mnemonic::Heading).unwrap();
            assert!((0.0..360.0).contains(&heading), "heading {} at t={}", heading, t);
            let depth = record.scalar(Mnemonic::Depth).unwrap();
            assert!(depth >= 0.0);
            let rpm = record.scalar(Mnemonic::EngineRpm(0)).unwrap();
            assert!(rpm >= 0.0);
        }
    }

    #[test]
    fn same_seed_reproduces_session() {
        let mut a = Generator::with_defaults(99);
        let mut b = Generator::with_defaults(99);
        let autopilot = AutopilotState::default();
        for i in 0..200 {
            let t = i as f64 * 0.1;
            let (ra, _) = a.tick(t, 0.1, (t * 1000.0) as u64, &autopilot);
            let (rb, _) = b.tick(t, 0.1, (t * 1000.0) as u64, &autopilot);
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn engaged_autopilot_converges_heading() {
        let mut generator = free_running();
        let mut autopilot = AutopilotState::default();
        autopilot.engage(AutopilotMode::Auto, 200.0, 0);

        let mut last = None;
        for i in 0..2000 {
            let t = i as f64 * 0.1;
            let (record, _) = generator.tick(t, 0.1, (t * 1000.0) as u64, &autopilot);
            let heading = record.scalar(Mnemonic::Heading).unwrap();
            if let Some(prev) = last {
                let step = crate::autopilot::heading_delta(prev, heading).abs();
                assert!(step <= 1.0 + 1e-9, "turn rate exceeded: {} deg/tick", step);
            }
            last = Some(heading);
        }
        assert!((last.unwrap() - 200.0).abs() < 1.0);
    }

    #[test]
    fn dropout_masks_position_and_restores() {
        let mut generator = free_running();
        let autopilot = AutopilotState::default();

        let (record, _) = generator.tick(0.0, 0.0, 0, &autopilot);
        assert!(record.get(Mnemonic::Position).is_some());

        generator.set_gps_dropout(true);
        let (record, _) = generator.tick(0.1, 0.1, 100, &autopilot);
        assert!(record.get(Mnemonic::Position).is_none());
        assert!(record.get(Mnemonic::Sog).is_none());
        assert!(record.get(Mnemonic::Cog).is_none());
        assert!(record.get(Mnemonic::Depth).is_some());

        generator.set_gps_dropout(false);
        let (record, _) = generator.tick(0.2, 0.1, 200, &autopilot);
        assert!(record.get(Mnemonic::Position).is_some());
    }

    #[test]
    fn engine_instances_never_cross() {
        let mut generator = Generator::new(5);
        generator.install("ENGINE_RPM[0]", PatternSpec::Constant { value: 1000.0 });
        generator.install("ENGINE_RPM[1]", PatternSpec::Constant { value: 2000.0 });
        let autopilot = AutopilotState::default();
        for i in 0..1000 {
            let t = i as f64 * 0.1;
            let (record, _) = generator.tick(t, 0.1, (t * 1000.0) as u64, &autopilot);
            assert_eq!(record.scalar(Mnemonic::EngineRpm(0)), Some(1000.0));
            assert_eq!(record.scalar(Mnemonic::EngineRpm(1)), Some(2000.0));
        }
    }

    #[test]
    fn out_of_range_pattern_clamps_with_warning() {
        let mut generator = Generator::new(5);
        generator.install("DEPTH", PatternSpec::Constant { value: -10.0 });
        let autopilot = AutopilotState::default();
        let (record, warnings) = generator.tick(0.0, 0.0, 0, &autopilot);
        assert_eq!(record.scalar(Mnemonic::Depth), Some(0.0));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].mnemonic, Mnemonic::Depth);
    }

    #[test]
    fn position_advances_with_sog() {
        let mut generator = Generator::new(5);
        generator.install("SOG", PatternSpec::Constant { value: 10.0 });
        generator.install("COG", PatternSpec::Constant { value: 0.0 });
        let autopilot = AutopilotState::default();

        let (first, _) = generator.tick(0.0, 0.0, 0, &autopilot);
        // One minute at 10 knots due north
        let (later, _) = generator.tick(60.0, 60.0, 60_000, &autopilot);
        let lat0 = match first.get(Mnemonic::Position).unwrap() {
            Value::Position { lat, .. } => *lat,
            _ => unreachable!(),
        };
        let lat1 = match later.get(Mnemonic::Position).unwrap() {
            Value::Position { lat, .. } => *lat,
            _ => unreachable!(),
        };
        // 10 kn for 60 s is 1/6 nm, about 1/360 degree of latitude
        assert!((lat1 - lat0 - 1.0 / 360.0).abs() < 1e-4);
    }
}
