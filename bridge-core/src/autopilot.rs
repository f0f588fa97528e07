//! Autopilot command state and rate limiting.
//!
//! The state lives inside the scenario engine task and is mutated only via
//! command-channel messages; this module holds the pure pieces - the mode
//! machine, the token bucket and the bounded-rate heading convergence the
//! generator applies while the autopilot is engaged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::telemetry::wrap_degrees;

/// Maximum simulated turn rate while the autopilot steers, degrees/second.
pub const MAX_TURN_RATE: f64 = 10.0;

/// Accepted command rate: one token per second, burst of one.
pub const COMMAND_RATE_PER_SEC: f64 = 1.0;
pub const COMMAND_BURST: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutopilotMode {
    #[default]
    Off,
    Standby,
    Auto,
    Wind,
    Track,
}

impl AutopilotMode {
    /// Modes in which the vessel actively steers toward the target heading.
    pub fn is_engaged(&self) -> bool {
        matches!(self, Self::Auto | Self::Wind | Self::Track)
    }
}

impl fmt::Display for AutopilotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Standby => write!(f, "standby"),
            Self::Auto => write!(f, "auto"),
            Self::Wind => write!(f, "wind"),
            Self::Track => write!(f, "track"),
        }
    }
}

impl FromStr for AutopilotMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "standby" => Ok(Self::Standby),
            "auto" => Ok(Self::Auto),
            "wind" => Ok(Self::Wind),
            "track" => Ok(Self::Track),
            _ => Err(()),
        }
    }
}

/// Current autopilot command state.
///
/// Owned by the scenario engine task; read by the generator when producing
/// heading telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutopilotState {
    pub mode: AutopilotMode,
    pub target_heading: f64,
    /// Session timestamp of the last applied command, ms.
    pub last_command_ms: Option<u64>,
}

impl Default for AutopilotState {
    fn default() -> Self {
        Self {
            mode: AutopilotMode::Standby,
            target_heading: 0.0,
            last_command_ms: None,
        }
    }
}

impl AutopilotState {
    pub fn engage(&mut self, mode: AutopilotMode, heading: f64, now_ms: u64) {
        self.mode = mode;
        self.target_heading = wrap_degrees(heading);
        self.last_command_ms = Some(now_ms);
    }

    pub fn set_heading(&mut self, heading: f64, now_ms: u64) {
        self.target_heading = wrap_degrees(heading);
        self.last_command_ms = Some(now_ms);
    }

    pub fn disengage(&mut self, now_ms: u64) {
        self.mode = AutopilotMode::Standby;
        self.last_command_ms = Some(now_ms);
    }
}

/// Signed shortest-path difference from `from` to `to`, in (-180, 180].
pub fn heading_delta(from: f64, to: f64) -> f64 {
    let mut delta = wrap_degrees(to) - wrap_degrees(from);
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

/// Step `current` toward `target` at no more than [`MAX_TURN_RATE`] over `dt`
/// seconds, turning the shorter way around the compass.
pub fn converge_heading(current: f64, target: f64, dt: f64) -> f64 {
    let delta = heading_delta(current, target);
    let max_step = MAX_TURN_RATE * dt.max(0.0);
    let step = delta.clamp(-max_step, max_step);
    wrap_degrees(current + step)
}

/// Token bucket limiting accepted autopilot commands.
///
/// Excess commands are NAKed (never silently dropped) so client retry logic
/// can react. The emergency disengage path bypasses this bucket entirely.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_ms: f64,
    last_ms: u64,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            capacity: burst,
            refill_per_ms: rate_per_sec / 1000.0,
            last_ms: 0,
        }
    }

    /// Take one token at `now_ms`, returning whether the command may proceed.
    pub fn try_take(&mut self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.last_ms) as f64;
        self.last_ms = now_ms;
        self.tokens = (self.tokens + elapsed * self.refill_per_ms).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(COMMAND_RATE_PER_SEC, COMMAND_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_commands_in_one_second_accept_exactly_one() {
        let mut bucket = TokenBucket::default();
        let accepted: usize = (0..5)
            .map(|i| bucket.try_take(1000 + i * 200) as usize)
            .sum();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn bucket_refills_after_a_second() {
        let mut bucket = TokenBucket::default();
        assert!(bucket.try_take(0));
        assert!(!bucket.try_take(500));
        assert!(bucket.try_take(1600));
    }

    #[test]
    fn convergence_is_bounded_by_turn_rate() {
        // 0.1s tick: at most 1 degree of turn
        let next = converge_heading(100.0, 200.0, 0.1);
        assert!((next - 101.0).abs() < 1e-9);
    }

    #[test]
    fn convergence_turns_the_short_way() {
        // 350 -> 10 should go through north, not all the way around
        let next = converge_heading(350.0, 10.0, 1.0);
        assert!((next - 0.0).abs() < 1e-9);
        let next = converge_heading(10.0, 350.0, 1.0);
        assert!((next - 0.0).abs() < 1e-9);
    }

    #[test]
    fn convergence_settles_on_target() {
        let mut heading = 90.0;
        for _ in 0..100 {
            heading = converge_heading(heading, 93.0, 0.1);
        }
        assert!((heading - 93.0).abs() < 1e-6);
    }

    #[test]
    fn mode_parse_roundtrip() {
        for mode in [
            AutopilotMode::Off,
            AutopilotMode::Standby,
            AutopilotMode::Auto,
            AutopilotMode::Wind,
            AutopilotMode::Track,
        ] {
            assert_eq!(mode.to_string().parse::<AutopilotMode>().unwrap(), mode);
        }
        assert!("warp".parse::<AutopilotMode>().is_err());
    }
}
