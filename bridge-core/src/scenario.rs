//! Declarative scenario definitions.
//!
//! A scenario is an ordered list of timed events. Each event installs data
//! patterns for one or more instruments and may trigger a state transition
//! (autopilot engage, GPS dropout). Scenarios validate fully at load time;
//! a definition that passes [`ScenarioDefinition::validate`] can be run
//! without further failure.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::autopilot::AutopilotMode;
use crate::pattern::PatternSpec;
use crate::telemetry::Mnemonic;
use crate::ValidationError;

/// State transition attached to a scenario event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StateTransition {
    /// Engage the autopilot in the given mode, steering to `heading`.
    EngageAutopilot { mode: AutopilotMode, heading: f64 },
    /// Drop the autopilot back to standby.
    DisengageAutopilot,
    /// Suppress position/SOG/COG output, simulating a GPS outage.
    GpsDropout,
    /// Restore position output after a dropout.
    GpsRestore,
}

/// One timed event within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScenarioEvent {
    /// Trigger time in virtual-clock seconds, relative to scenario start.
    pub at: f64,
    /// Patterns to install, keyed by instrument mnemonic (`"SOG"`,
    /// `"ENGINE_RPM[1]"`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patterns: BTreeMap<String, PatternSpec>,
    /// Optional state transition fired when the event triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<StateTransition>,
}

/// A named, declarative scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    /// Virtual duration in seconds. When reached the scenario either stops or,
    /// with `loop: true`, wraps the virtual clock to zero.
    pub duration: f64,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    pub events: Vec<ScenarioEvent>,
}

impl ScenarioDefinition {
    /// Validate event ordering, pattern specs and mnemonic keys.
    ///
    /// Called once when the scenario loads; a validated scenario never fails
    /// during ticking.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.duration <= 0.0 || !self.duration.is_finite() {
            return Err(ValidationError::Duration(self.name.clone()));
        }
        if self.events.is_empty() {
            return Err(ValidationError::EmptyScenario(self.name.clone()));
        }
        let mut last_at = 0.0_f64;
        for event in &self.events {
            if event.at < last_at {
                return Err(ValidationError::EventOrder(self.name.clone(), event.at));
            }
            if event.at > self.duration {
                return Err(ValidationError::EventPastEnd(
                    self.name.clone(),
                    event.at,
                    self.duration,
                ));
            }
            last_at = event.at;
            for (key, spec) in &event.patterns {
                Mnemonic::from_str(key)?;
                spec.validate_for(key)?;
            }
            if let Some(StateTransition::EngageAutopilot { heading, .. }) = &event.transition {
                if !(0.0..360.0).contains(heading) {
                    return Err(ValidationError::Pattern(
                        "autopilot".to_string(),
                        format!("target heading {} outside [0,360)", heading),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parse and validate a scenario from JSON.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let scenario: ScenarioDefinition = serde_json::from_str(json)
            .map_err(|e| ValidationError::Sentence(format!("scenario JSON: {}", e)))?;
        scenario.validate()?;
        Ok(scenario)
    }
}

fn pattern_map(entries: &[(&str, PatternSpec)]) -> BTreeMap<String, PatternSpec> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The built-in scenario catalog.
///
/// These ship with the simulator so test harnesses can start a named scenario
/// without provisioning files first. Scenario JSON files on disk extend (and
/// may shadow) this set.
pub fn builtin_scenarios() -> Vec<ScenarioDefinition> {
    vec![calm_cruise(), engine_sea_trial(), gps_dropout(), autopilot_exercise()]
}

/// Look up a built-in scenario by name.
pub fn builtin(name: &str) -> Option<ScenarioDefinition> {
    builtin_scenarios().into_iter().find(|s| s.name == name)
}

fn calm_cruise() -> ScenarioDefinition {
    ScenarioDefinition {
        name: "calm-cruise".to_string(),
        duration: 300.0,
        looped: true,
        events: vec![ScenarioEvent {
            at: 0.0,
            patterns: pattern_map(&[
                (
                    "SOG",
                    PatternSpec::Sine {
                        amplitude: 0.4,
                        period: 60.0,
                        phase: 0.0,
                        offset: 6.2,
                    },
                ),
                (
                    "COG",
                    PatternSpec::RandomWalk {
                        start: 80.0,
                        step: 0.5,
                        min: 70.0,
                        max: 90.0,
                    },
                ),
                (
                    "HDG",
                    PatternSpec::RandomWalk {
                        start: 82.0,
                        step: 0.5,
                        min: 70.0,
                        max: 90.0,
                    },
                ),
                (
                    "STW",
                    PatternSpec::Sine {
                        amplitude: 0.3,
                        period: 45.0,
                        phase: 0.5,
                        offset: 6.0,
                    },
                ),
                (
                    "DEPTH",
                    PatternSpec::RandomWalk {
                        start: 24.0,
                        step: 0.3,
                        min: 8.0,
                        max: 60.0,
                    },
                ),
                (
                    "AWA",
                    PatternSpec::GaussianNoise {
                        mean: 35.0,
                        stddev: 4.0,
                    },
                ),
                (
                    "AWS",
                    PatternSpec::GaussianNoise {
                        mean: 11.0,
                        stddev: 1.5,
                    },
                ),
                (
                    "ENGINE_RPM[0]",
                    PatternSpec::GaussianNoise {
                        mean: 2400.0,
                        stddev: 25.0,
                    },
                ),
                ("BATTERY_VOLTS[0]", PatternSpec::Constant { value: 13.8 }),
                (
                    "FUEL_LEVEL[0]",
                    PatternSpec::RandomWalk {
                        start: 72.0,
                        step: 0.02,
                        min: 0.0,
                        max: 100.0,
                    },
                ),
            ]),
            transition: None,
        }],
    }
}

fn engine_sea_trial() -> ScenarioDefinition {
    ScenarioDefinition {
        name: "engine-sea-trial".to_string(),
        duration: 180.0,
        looped: false,
        events: vec![
            ScenarioEvent {
                at: 0.0,
                patterns: pattern_map(&[
                    ("ENGINE_RPM[0]", PatternSpec::Constant { value: 850.0 }),
                    ("ENGINE_RPM[1]", PatternSpec::Constant { value: 850.0 }),
                    ("BATTERY_VOLTS[0]", PatternSpec::Constant { value: 12.4 }),
                    (
                        "BATTERY_VOLTS[1]",
                        PatternSpec::GaussianNoise {
                            mean: 13.9,
                            stddev: 0.05,
                        },
                    ),
                    ("FUEL_LEVEL[0]", PatternSpec::Constant { value: 95.0 }),
                    ("FUEL_LEVEL[1]", PatternSpec::Constant { value: 88.0 }),
                    ("SOG", PatternSpec::Constant { value: 0.0 }),
                    ("HDG", PatternSpec::Constant { value: 315.0 }),
                ]),
                transition: None,
            },
            ScenarioEvent {
                at: 30.0,
                patterns: pattern_map(&[
                    (
                        "ENGINE_RPM[0]",
                        PatternSpec::GaussianNoise {
                            mean: 2200.0,
                            stddev: 40.0,
                        },
                    ),
                    (
                        "ENGINE_RPM[1]",
                        PatternSpec::GaussianNoise {
                            mean: 2250.0,
                            stddev: 40.0,
                        },
                    ),
                    (
                        "SOG",
                        PatternSpec::Sine {
                            amplitude: 1.0,
                            period: 40.0,
                            phase: 0.0,
                            offset: 14.0,
                        },
                    ),
                ]),
                transition: None,
            },
            ScenarioEvent {
                at: 120.0,
                patterns: pattern_map(&[
                    ("ENGINE_RPM[0]", PatternSpec::Constant { value: 850.0 }),
                    ("ENGINE_RPM[1]", PatternSpec::Constant { value: 850.0 }),
                    ("SOG", PatternSpec::Constant { value: 2.0 }),
                ]),
                transition: None,
            },
        ],
    }
}

fn gps_dropout() -> ScenarioDefinition {
    ScenarioDefinition {
        name: "gps-dropout".to_string(),
        duration: 120.0,
        looped: true,
        events: vec![
            ScenarioEvent {
                at: 0.0,
                patterns: pattern_map(&[
                    ("SOG", PatternSpec::Constant { value: 5.5 }),
                    ("COG", PatternSpec::Constant { value: 180.0 }),
                    ("HDG", PatternSpec::Constant { value: 182.0 }),
                ]),
                transition: Some(StateTransition::GpsRestore),
            },
            ScenarioEvent {
                at: 45.0,
                patterns: BTreeMap::new(),
                transition: Some(StateTransition::GpsDropout),
            },
            ScenarioEvent {
                at: 75.0,
                patterns: BTreeMap::new(),
                transition: Some(StateTransition::GpsRestore),
            },
        ],
    }
}

fn autopilot_exercise() -> ScenarioDefinition {
    ScenarioDefinition {
        name: "autopilot-exercise".to_string(),
        duration: 240.0,
        looped: false,
        events: vec![
            ScenarioEvent {
                at: 0.0,
                patterns: pattern_map(&[
                    ("SOG", PatternSpec::Constant { value: 7.0 }),
                    (
                        "HDG",
                        PatternSpec::RandomWalk {
                            start: 45.0,
                            step: 1.0,
                            min: 20.0,
                            max: 70.0,
                        },
                    ),
                ]),
                transition: None,
            },
            ScenarioEvent {
                at: 60.0,
                patterns: BTreeMap::new(),
                transition: Some(StateTransition::EngageAutopilot {
                    mode: AutopilotMode::Auto,
                    heading: 120.0,
                }),
            },
            ScenarioEvent {
                at: 180.0,
                patterns: BTreeMap::new(),
                transition: Some(StateTransition::DisengageAutopilot),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_all_validate() {
        for scenario in builtin_scenarios() {
            scenario
                .validate()
                .unwrap_or_else(|e| panic!("builtin '{}' invalid: {}", scenario.name, e));
        }
    }

    #[test]
    fn out_of_order_events_rejected() {
        let scenario = ScenarioDefinition {
            name: "bad".to_string(),
            duration: 60.0,
            looped: false,
            events: vec![
                ScenarioEvent {
                    at: 30.0,
                    ..Default::default()
                },
                ScenarioEvent {
                    at: 10.0,
                    ..Default::default()
                },
            ],
        };
        assert!(matches!(
            scenario.validate(),
            Err(ValidationError::EventOrder(_, _))
        ));
    }

    #[test]
    fn event_past_duration_rejected() {
        let scenario = ScenarioDefinition {
            name: "bad".to_string(),
            duration: 10.0,
            looped: false,
            events: vec![ScenarioEvent {
                at: 20.0,
                ..Default::default()
            }],
        };
        assert!(matches!(
            scenario.validate(),
            Err(ValidationError::EventPastEnd(_, _, _))
        ));
    }

    #[test]
    fn bad_pattern_fails_at_load_not_tick() {
        let mut patterns = BTreeMap::new();
        patterns.insert(
            "DEPTH".to_string(),
            PatternSpec::Sine {
                amplitude: 1.0,
                period: -1.0,
                phase: 0.0,
                offset: 10.0,
            },
        );
        let scenario = ScenarioDefinition {
            name: "bad".to_string(),
            duration: 60.0,
            looped: false,
            events: vec![ScenarioEvent {
                at: 0.0,
                patterns,
                transition: None,
            }],
        };
        assert!(matches!(
            scenario.validate(),
            Err(ValidationError::Pattern(_, _))
        ));
    }

    #[test]
    fn json_loop_flag_parses() {
        let json = r#"{
            "name": "looper",
            "duration": 5.0,
            "loop": true,
            "events": [
                {"at": 0.0, "patterns": {"SOG": {"kind": "constant", "value": 4.0}}}
            ]
        }"#;
        let scenario = ScenarioDefinition::from_json(json).unwrap();
        assert!(scenario.looped);
        assert_eq!(scenario.events.len(), 1);
    }

    #[test]
    fn unknown_mnemonic_in_json_rejected() {
        let json = r#"{
            "name": "bad",
            "duration": 5.0,
            "events": [
                {"at": 0.0, "patterns": {"FLUX": {"kind": "constant", "value": 1.0}}}
            ]
        }"#;
        assert!(ScenarioDefinition::from_json(json).is_err());
    }
}
