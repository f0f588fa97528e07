//! Data-pattern functions driving telemetry generation.
//!
//! Patterns are a closed set of kinds; each evaluates as a pure function of
//! virtual time and its own accumulated state. Randomized kinds draw from an
//! `StdRng` seeded per session so test runs reproduce exactly.
//!
//! Validation happens once, at scenario load. Evaluation is infallible - the
//! tick loop must never fail.

use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Declarative pattern specification, as written in scenario files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatternSpec {
    /// Fixed value.
    Constant { value: f64 },
    /// `offset + amplitude * sin(2 pi (t / period) + phase)`.
    Sine {
        amplitude: f64,
        /// Period in virtual seconds. Must be positive.
        period: f64,
        #[serde(default)]
        phase: f64,
        offset: f64,
    },
    /// Gaussian noise around a mean.
    GaussianNoise { mean: f64, stddev: f64 },
    /// Bounded random walk: each sample steps up to `step` from the last.
    RandomWalk {
        start: f64,
        step: f64,
        min: f64,
        max: f64,
    },
}

impl PatternSpec {
    /// Fail-fast validation, run at scenario load time.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PatternSpec::Constant { value } => {
                if !value.is_finite() {
                    return Err("constant value must be finite".to_string());
                }
            }
            PatternSpec::Sine {
                amplitude, period, ..
            } => {
                if *period <= 0.0 || !period.is_finite() {
                    return Err(format!("period must be positive, got {}", period));
                }
                if !amplitude.is_finite() {
                    return Err("amplitude must be finite".to_string());
                }
            }
            PatternSpec::GaussianNoise { stddev, .. } => {
                if *stddev < 0.0 || !stddev.is_finite() {
                    return Err(format!("stddev must be non-negative, got {}", stddev));
                }
            }
            PatternSpec::RandomWalk {
                start, step, min, max,
            } => {
                if *step < 0.0 || !step.is_finite() {
                    return Err(format!("step must be non-negative, got {}", step));
                }
                if min > max {
                    return Err(format!("bounds inverted: min {} > max {}", min, max));
                }
                if start < min || start > max {
                    return Err(format!("start {} outside bounds [{}, {}]", start, min, max));
                }
            }
        }
        Ok(())
    }

    /// Validate with the owning instrument name attached, for load-time errors.
    pub fn validate_for(&self, instrument: &str) -> Result<(), ValidationError> {
        self.validate()
            .map_err(|reason| ValidationError::Pattern(instrument.to_string(), reason))
    }
}

/// A pattern plus its accumulated evaluation state.
#[derive(Debug, Clone)]
pub struct PatternState {
    spec: PatternSpec,
    rng: StdRng,
    /// Last emitted value, the accumulator for random walks.
    last: f64,
}

impl PatternState {
    /// Build evaluation state for a validated spec.
    pub fn new(spec: PatternSpec, seed: u64) -> Self {
        let last = match &spec {
            PatternSpec::Constant { value } => *value,
            PatternSpec::Sine { offset, .. } => *offset,
            PatternSpec::GaussianNoise { mean, .. } => *mean,
            PatternSpec::RandomWalk { start, .. } => *start,
        };
        Self {
            spec,
            rng: StdRng::seed_from_u64(seed),
            last,
        }
    }

    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Evaluate at virtual time `t` seconds. Never fails.
    pub fn sample(&mut self, t: f64) -> f64 {
        let value = match &self.spec {
            PatternSpec::Constant { value } => *value,
            PatternSpec::Sine {
                amplitude,
                period,
                phase,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * t / period + phase).sin(),
            PatternSpec::GaussianNoise { mean, stddev } => {
                // stddev validated non-negative at load
                let normal = Normal::new(*mean, *stddev).unwrap_or(Normal::new(*mean, 0.0).unwrap());
                normal.sample(&mut self.rng)
            }
            PatternSpec::RandomWalk { step, min, max, .. } => {
                let delta = self.rng.gen_range(-*step..=*step);
                (self.last + delta).clamp(*min, *max)
            }
        };
        self.last = value;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_period_fails_at_validation() {
        let spec = PatternSpec::Sine {
            amplitude: 1.0,
            period: -5.0,
            phase: 0.0,
            offset: 0.0,
        };
        assert!(spec.validate().is_err());
        assert!(matches!(
            spec.validate_for("HDG"),
            Err(ValidationError::Pattern(_, _))
        ));
    }

    #[test]
    fn inverted_walk_bounds_fail() {
        let spec = PatternSpec::RandomWalk {
            start: 5.0,
            step: 1.0,
            min: 10.0,
            max: 0.0,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn sine_evaluates_at_known_points() {
        let spec = PatternSpec::Sine {
            amplitude: 2.0,
            period: 10.0,
            phase: 0.0,
            offset: 5.0,
        };
        spec.validate().unwrap();
        let mut state = PatternState::new(spec, 0);
        assert!((state.sample(0.0) - 5.0).abs() < 1e-9);
        assert!((state.sample(2.5) - 7.0).abs() < 1e-9);
        assert!((state.sample(7.5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_reproduces_noise() {
        let spec = PatternSpec::GaussianNoise {
            mean: 10.0,
            stddev: 2.0,
        };
        let mut a = PatternState::new(spec.clone(), 42);
        let mut b = PatternState::new(spec, 42);
        for i in 0..100 {
            let t = i as f64 * 0.1;
            assert_eq!(a.sample(t), b.sample(t));
        }
    }

    #[test]
    fn random_walk_respects_bounds() {
        let spec = PatternSpec::RandomWalk {
            start: 50.0,
            step: 20.0,
            min: 0.0,
            max: 100.0,
        };
        let mut state = PatternState::new(spec, 7);
        for i in 0..1000 {
            let v = state.sample(i as f64 * 0.1);
            assert!((0.0..=100.0).contains(&v), "walk escaped bounds: {}", v);
        }
    }

    #[test]
    fn zero_stddev_noise_is_the_mean() {
        let spec = PatternSpec::GaussianNoise {
            mean: 3.5,
            stddev: 0.0,
        };
        let mut state = PatternState::new(spec, 1);
        assert_eq!(state.sample(0.0), 3.5);
    }
}
