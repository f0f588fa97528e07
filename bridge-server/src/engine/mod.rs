//! The scenario engine task.
//!
//! The engine exclusively owns the virtual clock, the autopilot state and the
//! active tick source. Every mutation arrives as an [`EngineCommand`] message
//! from the command channel or the control API; status flows out through a
//! watch channel. No other component touches simulator state directly.
//!
//! State machine: `Idle -> Loading -> Running -> (Looping | Paused) ->
//! Stopped`. Stop is cooperative - the tick loop observes it within one tick
//! period - and idempotent. Loop wrap never touches connection state; the
//! protocol servers own their connection sets and the engine only feeds the
//! broadcast channel.

mod source;

pub use source::{spawn_live_reader, LoadSource, TickSource};

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use bridge_core::autopilot::AutopilotState;
use bridge_core::command::BridgeCommand;
use bridge_core::encoder::Encoder;
use bridge_core::generator::Generator;
use bridge_core::scenario::StateTransition;
use bridge_core::WireProtocol;

use crate::{BridgeError, Session};

/// Broadcast tick period.
pub const TICK: Duration = Duration::from_millis(100);

/// Scenario engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Loading,
    Running,
    Looping,
    Paused,
    Stopped,
}

/// What currently feeds the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, Default)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SourceKind {
    #[default]
    None,
    FreeRun,
    Scenario,
    Playback,
    Live,
}

/// Status snapshot published after every tick and command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Virtual time within the scenario, seconds.
    pub virtual_time: f64,
    pub loop_count: u32,
    pub speed: f64,
    pub autopilot: AutopilotState,
}

impl EngineStatus {
    pub fn idle() -> Self {
        Self {
            state: EngineState::Idle,
            source: SourceKind::None,
            scenario: None,
            virtual_time: 0.0,
            loop_count: 0,
            speed: 1.0,
            autopilot: AutopilotState::default(),
        }
    }
}

/// Error-condition simulation requested over the control API.
#[derive(Debug, Clone, Copy)]
pub enum ErrorSim {
    /// Corrupt the checksum of the next `count` broadcast payloads.
    Checksum { count: u32 },
    /// Suppress broadcasts for the given wall-clock duration.
    Timeout { duration_ms: u64 },
}

/// Mutation messages into the engine task.
pub enum EngineCommand {
    Load {
        source: LoadSource,
        speed: f64,
        looped: bool,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Idempotent: stopping a stopped engine succeeds.
    Stop { reply: oneshot::Sender<()> },
    Pause,
    Resume,
    /// A validated, rate-limit-cleared autopilot command.
    Autopilot(BridgeCommand),
    SimulateError(ErrorSim),
}

/// The engine's synchronous core: all state, no I/O, fully testable.
pub struct EngineCore {
    state: EngineState,
    source: TickSource,
    name: Option<String>,
    speed: f64,
    looped: bool,
    /// Virtual scenario duration in seconds; infinite for free-run and live.
    duration: f64,
    /// Virtual time within the scenario.
    t: f64,
    /// Session-monotonic virtual milliseconds, not reset by loop wraps.
    session_ms: f64,
    loop_count: u32,
    autopilot: AutopilotState,
    generator: Generator,
    encoder: Encoder,
    seed: u64,
    corrupt_remaining: u32,
    suppress_ticks: u32,
}

impl EngineCore {
    pub fn new(seed: u64, protocol: WireProtocol, base_unix_ms: u64) -> Self {
        Self {
            state: EngineState::Idle,
            source: TickSource::Idle,
            name: None,
            speed: 1.0,
            looped: false,
            duration: f64::INFINITY,
            t: 0.0,
            session_ms: 0.0,
            loop_count: 0,
            autopilot: AutopilotState::default(),
            generator: Generator::new(seed),
            encoder: Encoder::new(protocol, base_unix_ms),
            seed,
            corrupt_remaining: 0,
            suppress_ticks: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            source: self.source.kind(),
            scenario: self.name.clone(),
            virtual_time: self.t,
            loop_count: self.loop_count,
            speed: self.speed,
            autopilot: self.autopilot,
        }
    }

    /// Load a new source. Fails while a scenario is running - switching
    /// requires an explicit stop first, there is no in-place hot swap.
    pub fn load(
        &mut self,
        source: LoadSource,
        speed: f64,
        looped: bool,
    ) -> Result<(), BridgeError> {
        if matches!(
            self.state,
            EngineState::Running | EngineState::Paused | EngineState::Looping
        ) {
            return Err(BridgeError::Busy(format!(
                "'{}' is active; stop it before loading",
                self.name.as_deref().unwrap_or("session")
            )));
        }
        self.state = EngineState::Loading;

        match source {
            LoadSource::Scenario(scenario) => {
                if let Err(e) = scenario.validate() {
                    self.state = EngineState::Stopped;
                    return Err(e.into());
                }
                self.duration = scenario.duration;
                self.name = Some(scenario.name.clone());
                self.generator = Generator::new(self.seed);
                self.source = TickSource::Scenario {
                    scenario,
                    event_idx: 0,
                };
            }
            LoadSource::FreeRun => {
                self.duration = f64::INFINITY;
                self.name = None;
                self.generator = Generator::with_defaults(self.seed);
                self.source = TickSource::FreeRun;
            }
            LoadSource::Replay { name, frames } => {
                if frames.is_empty() {
                    self.state = EngineState::Stopped;
                    return Err(BridgeError::Recording(format!(
                        "'{}' contains no frames",
                        name
                    )));
                }
                self.duration = frames.last().map(|f| f.offset_ms as f64 / 1000.0).unwrap();
                self.name = Some(name);
                self.source = TickSource::Replay { frames, idx: 0 };
            }
            LoadSource::Live { host, port } => {
                self.duration = f64::INFINITY;
                self.name = Some(format!("{}:{}", host, port));
                self.source = TickSource::Live;
            }
        }

        self.t = 0.0;
        self.loop_count = 0;
        self.speed = if speed > 0.0 { speed } else { 1.0 };
        self.looped = looped;
        self.state = EngineState::Running;
        info!(
            "Engine running: {} ({}), speed {}x, loop {}",
            self.name.as_deref().unwrap_or("free-run"),
            self.source.kind(),
            self.speed,
            self.looped
        );
        Ok(())
    }

    /// Cooperative, idempotent stop. Releases scenario-specific state; the
    /// process and protocol servers stay up for the next load.
    pub fn stop(&mut self) {
        if matches!(self.state, EngineState::Idle | EngineState::Stopped) {
            return;
        }
        info!(
            "Engine stopped after {:.1}s virtual ({} loops)",
            self.t, self.loop_count
        );
        self.state = EngineState::Stopped;
        self.source = TickSource::Idle;
        self.name = None;
        self.generator.reset();
    }

    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            self.state = EngineState::Paused;
            debug!("Engine paused at {:.2}s virtual", self.t);
        }
    }

    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.state = EngineState::Running;
            debug!("Engine resumed at {:.2}s virtual", self.t);
        }
    }

    /// Apply an autopilot command (already validated and rate-limited).
    pub fn apply_autopilot(&mut self, command: BridgeCommand) {
        let now_ms = self.session_ms as u64;
        match command {
            BridgeCommand::Engage { mode, heading } => {
                info!("Autopilot engaged: {} -> {:.1}", mode, heading);
                self.autopilot.engage(mode, heading, now_ms);
            }
            BridgeCommand::SetHeading { heading } => {
                debug!("Autopilot target heading {:.1}", heading);
                self.autopilot.set_heading(heading, now_ms);
            }
            BridgeCommand::Standby | BridgeCommand::Disengage => {
                info!("Autopilot disengaged");
                self.autopilot.disengage(now_ms);
            }
        }
    }

    pub fn simulate(&mut self, sim: ErrorSim) {
        match sim {
            ErrorSim::Checksum { count } => {
                warn!("Simulating {} corrupted checksums", count);
                self.corrupt_remaining = count;
            }
            ErrorSim::Timeout { duration_ms } => {
                warn!("Simulating a {}ms broadcast timeout", duration_ms);
                self.suppress_ticks = (duration_ms / TICK.as_millis() as u64).max(1) as u32;
            }
        }
    }

    /// Advance the virtual clock by `dt_wall` wall seconds and produce this
    /// tick's broadcast payloads. Infallible; returns nothing unless Running.
    pub fn tick(&mut self, dt_wall: f64) -> Vec<Vec<u8>> {
        if self.state == EngineState::Looping {
            self.state = EngineState::Running;
        }
        if self.state != EngineState::Running {
            return Vec::new();
        }

        let dt = dt_wall.max(0.0) * self.speed;
        self.t += dt;
        self.session_ms += dt * 1000.0;
        let session_ms = self.session_ms as u64;

        let mut payloads = match &mut self.source {
            TickSource::Scenario {
                scenario,
                event_idx,
            } => {
                let mut transitions = Vec::new();
                while *event_idx < scenario.events.len()
                    && scenario.events[*event_idx].at <= self.t
                {
                    if let Some(t) = self.generator.apply_event(&scenario.events[*event_idx]) {
                        transitions.push(t);
                    }
                    *event_idx += 1;
                }
                for transition in transitions {
                    match transition {
                        StateTransition::EngageAutopilot { mode, heading } => {
                            self.autopilot.engage(mode, heading, session_ms)
                        }
                        StateTransition::DisengageAutopilot => {
                            self.autopilot.disengage(session_ms)
                        }
                        StateTransition::GpsDropout => self.generator.set_gps_dropout(true),
                        StateTransition::GpsRestore => self.generator.set_gps_dropout(false),
                    }
                }
                let (record, warnings) =
                    self.generator.tick(self.t, dt, session_ms, &self.autopilot);
                for warning in &warnings {
                    warn!("Generation: {}", warning);
                }
                let (payloads, dropped) = self.encoder.encode(&record);
                for drop in &dropped {
                    warn!("Encoder: {}", drop);
                }
                payloads
            }
            TickSource::FreeRun => {
                let (record, warnings) =
                    self.generator.tick(self.t, dt, session_ms, &self.autopilot);
                for warning in &warnings {
                    warn!("Generation: {}", warning);
                }
                let (payloads, dropped) = self.encoder.encode(&record);
                for drop in &dropped {
                    warn!("Encoder: {}", drop);
                }
                payloads
            }
            TickSource::Replay { frames, idx } => {
                let virtual_ms = (self.t * 1000.0) as u32;
                let mut out = Vec::new();
                while *idx < frames.len() && frames[*idx].offset_ms <= virtual_ms {
                    out.push(frames[*idx].data.clone());
                    *idx += 1;
                }
                out
            }
            // Live data is pushed straight onto the broadcast channel by the
            // reader task; the engine only keeps the clock for status
            TickSource::Live | TickSource::Idle => Vec::new(),
        };

        // End of source: wrap or stop
        if self.t >= self.duration {
            if self.looped {
                self.loop_count += 1;
                self.t -= self.duration;
                self.source.rewind();
                self.state = EngineState::Looping;
                debug!("Scenario wrapped, loop {}", self.loop_count);
            } else {
                self.stop();
            }
        }

        if self.suppress_ticks > 0 {
            self.suppress_ticks -= 1;
            return Vec::new();
        }
        if self.corrupt_remaining > 0 {
            for payload in payloads.iter_mut() {
                if self.corrupt_remaining == 0 {
                    break;
                }
                corrupt_payload(payload);
                self.corrupt_remaining -= 1;
            }
        }
        payloads
    }
}

/// Flip one body byte so the payload's checksum no longer matches.
fn corrupt_payload(payload: &mut [u8]) {
    // Text sentences: flip a character inside the body; binary frames: flip
    // the trailing checksum byte
    if payload.first() == Some(&b'$') && payload.len() > 4 {
        payload[2] ^= 0x01;
    } else if let Some(last) = payload.last_mut() {
        *last ^= 0xFF;
    }
}

/// The engine subsystem: wraps [`EngineCore`] with channels and the timer.
pub struct Engine {
    core: EngineCore,
    rx: mpsc::Receiver<EngineCommand>,
    status_tx: watch::Sender<EngineStatus>,
    data_tx: broadcast::Sender<Vec<u8>>,
    live_cancel: Option<CancellationToken>,
    initial: Option<(LoadSource, f64, bool)>,
}

impl Engine {
    pub fn new(
        session: &Session,
        engine_rx: mpsc::Receiver<EngineCommand>,
        status_tx: watch::Sender<EngineStatus>,
        initial: Option<(LoadSource, f64, bool)>,
    ) -> Self {
        let args = session.args();
        let base_unix_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let core = EngineCore::new(args.seed, args.protocol.into(), base_unix_ms);
        Self {
            core,
            rx: engine_rx,
            status_tx,
            data_tx: session.data_tx(),
            live_cancel: None,
            initial,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), BridgeError> {
        if let Some((source, speed, looped)) = self.initial.take() {
            self.start_load(source, speed, looped)
                .unwrap_or_else(|e| warn!("Initial load failed: {}", e));
        }
        self.publish_status();

        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    debug!("Engine shutting down");
                    break;
                },
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                    self.publish_status();
                },
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last).as_secs_f64();
                    last = now;
                    for payload in self.core.tick(dt) {
                        // send fails only when no client is subscribed
                        let _ = self.data_tx.send(payload);
                    }
                    self.publish_status();
                },
            }
        }

        self.cancel_live();
        Ok(())
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Load {
                source,
                speed,
                looped,
                reply,
            } => {
                let result = self.start_load(source, speed, looped);
                let _ = reply.send(result.map_err(|e| e.to_string()));
            }
            EngineCommand::Stop { reply } => {
                self.cancel_live();
                self.core.stop();
                let _ = reply.send(());
            }
            EngineCommand::Pause => self.core.pause(),
            EngineCommand::Resume => self.core.resume(),
            EngineCommand::Autopilot(cmd) => self.core.apply_autopilot(cmd),
            EngineCommand::SimulateError(sim) => self.core.simulate(sim),
        }
    }

    fn start_load(
        &mut self,
        source: LoadSource,
        speed: f64,
        looped: bool,
    ) -> Result<(), BridgeError> {
        if let LoadSource::Live { host, port } = &source {
            let cancel = CancellationToken::new();
            spawn_live_reader(host.clone(), *port, self.data_tx.clone(), cancel.clone());
            self.live_cancel = Some(cancel);
        }
        let result = self.core.load(source, speed, looped);
        if result.is_err() {
            self.cancel_live();
        }
        result
    }

    fn cancel_live(&mut self) {
        if let Some(cancel) = self.live_cancel.take() {
            cancel.cancel();
        }
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(self.core.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::autopilot::AutopilotMode;
    use bridge_core::scenario;
    use crate::recording::RecordedFrame;

    fn core() -> EngineCore {
        EngineCore::new(7, WireProtocol::Nmea0183, 0)
    }

    fn run_scenario(core: &mut EngineCore, name: &str, speed: f64, looped: bool) {
        let scenario = scenario::builtin(name).unwrap();
        core.load(LoadSource::Scenario(scenario), speed, looped)
            .unwrap();
    }

    #[test]
    fn idle_engine_does_not_tick() {
        let mut core = core();
        assert!(core.tick(0.1).is_empty());
        assert_eq!(core.state(), EngineState::Idle);
    }

    #[test]
    fn scenario_ticks_produce_payloads() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        let payloads = core.tick(0.1);
        assert!(!payloads.is_empty());
        for payload in &payloads {
            let sentence = std::str::from_utf8(payload).unwrap();
            bridge_core::nmea0183::verify(sentence).unwrap();
        }
    }

    #[test]
    fn loop_wraps_clock_and_counts() {
        let mut core = core();
        // 5-second scenario at 1x; drive 12 virtual seconds
        let scenario = bridge_core::scenario::ScenarioDefinition {
            name: "short".to_string(),
            duration: 5.0,
            looped: true,
            events: vec![bridge_core::scenario::ScenarioEvent {
                at: 0.0,
                patterns: [(
                    "SOG".to_string(),
                    bridge_core::pattern::PatternSpec::Constant { value: 5.0 },
                )]
                .into_iter()
                .collect(),
                transition: None,
            }],
        };
        core.load(LoadSource::Scenario(scenario), 1.0, true).unwrap();
        for _ in 0..120 {
            core.tick(0.1);
        }
        let status = core.status();
        assert_eq!(status.loop_count, 2);
        assert!(status.virtual_time < 5.0);
        assert_eq!(status.state, EngineState::Running);
    }

    #[test]
    fn non_looped_scenario_stops_at_end() {
        let mut core = core();
        let scenario = bridge_core::scenario::ScenarioDefinition {
            name: "short".to_string(),
            duration: 1.0,
            looped: false,
            events: vec![bridge_core::scenario::ScenarioEvent {
                at: 0.0,
                ..Default::default()
            }],
        };
        core.load(LoadSource::Scenario(scenario), 1.0, false).unwrap();
        for _ in 0..20 {
            core.tick(0.1);
        }
        assert_eq!(core.state(), EngineState::Stopped);
        // Stop released the name
        assert_eq!(core.status().scenario, None);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        core.stop();
        assert_eq!(core.state(), EngineState::Stopped);
        core.stop();
        assert_eq!(core.state(), EngineState::Stopped);
    }

    #[test]
    fn load_while_running_is_rejected() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        let other = scenario::builtin("gps-dropout").unwrap();
        assert!(matches!(
            core.load(LoadSource::Scenario(other), 1.0, false),
            Err(BridgeError::Busy(_))
        ));
        core.stop();
        let other = scenario::builtin("gps-dropout").unwrap();
        core.load(LoadSource::Scenario(other), 1.0, false).unwrap();
    }

    #[test]
    fn pause_freezes_virtual_time_without_jump() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        core.tick(0.1);
        let t_before = core.status().virtual_time;
        core.pause();
        for _ in 0..50 {
            assert!(core.tick(0.1).is_empty());
        }
        assert_eq!(core.status().virtual_time, t_before);
        core.resume();
        core.tick(0.1);
        let t_after = core.status().virtual_time;
        assert!((t_after - t_before - 0.1).abs() < 1e-9);
    }

    #[test]
    fn speed_multiplier_scales_virtual_clock() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 10.0, false);
        for _ in 0..10 {
            core.tick(0.1);
        }
        // 1 wall second at 10x is 10 virtual seconds
        assert!((core.status().virtual_time - 10.0).abs() < 1e-9);
    }

    #[test]
    fn replay_emits_frames_at_their_offsets() {
        let mut core = core();
        let frames = vec![
            RecordedFrame::new(0, b"first\r\n".to_vec()),
            RecordedFrame::new(250, b"second\r\n".to_vec()),
            RecordedFrame::new(900, b"third\r\n".to_vec()),
        ];
        core.load(
            LoadSource::Replay {
                name: "test.nbr".to_string(),
                frames,
            },
            1.0,
            false,
        )
        .unwrap();

        let mut emitted = Vec::new();
        for _ in 0..10 {
            emitted.extend(core.tick(0.1));
        }
        assert_eq!(
            emitted,
            vec![
                b"first\r\n".to_vec(),
                b"second\r\n".to_vec(),
                b"third\r\n".to_vec()
            ]
        );
        assert_eq!(core.state(), EngineState::Stopped);
    }

    #[test]
    fn looped_replay_restarts_from_first_frame() {
        let mut core = core();
        let frames = vec![
            RecordedFrame::new(0, b"a".to_vec()),
            RecordedFrame::new(200, b"b".to_vec()),
        ];
        core.load(
            LoadSource::Replay {
                name: "test.nbr".to_string(),
                frames,
            },
            1.0,
            true,
        )
        .unwrap();
        let mut emitted = Vec::new();
        for _ in 0..5 {
            emitted.extend(core.tick(0.1));
        }
        // Two full passes plus the start of a third: a b a b a
        assert_eq!(emitted.len(), 5);
        assert_eq!(emitted[0], emitted[2]);
        assert_eq!(core.status().loop_count, 2);
    }

    #[test]
    fn autopilot_command_steers_generated_heading() {
        let mut core = core();
        core.load(LoadSource::FreeRun, 1.0, false).unwrap();
        core.apply_autopilot(BridgeCommand::Engage {
            mode: AutopilotMode::Auto,
            heading: 200.0,
        });
        // Drive long enough for convergence at 10 deg/s
        let mut last_heading = None;
        for _ in 0..600 {
            for payload in core.tick(0.1) {
                let sentence = String::from_utf8(payload).unwrap();
                if let Some(rest) = sentence.strip_prefix("$IIHDT,") {
                    let heading: f64 = rest.split(',').next().unwrap().parse().unwrap();
                    last_heading = Some(heading);
                }
            }
        }
        let heading = last_heading.expect("no heading sentences seen");
        assert!((heading - 200.0).abs() < 1.5, "heading {}", heading);
    }

    #[test]
    fn checksum_simulation_corrupts_exactly_n_payloads() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        core.simulate(ErrorSim::Checksum { count: 3 });
        let mut bad = 0;
        for _ in 0..10 {
            for payload in core.tick(0.1) {
                let sentence = std::str::from_utf8(&payload).unwrap();
                if bridge_core::nmea0183::verify(sentence).is_err() {
                    bad += 1;
                }
            }
        }
        assert_eq!(bad, 3);
    }

    #[test]
    fn timeout_simulation_suppresses_broadcasts() {
        let mut core = core();
        run_scenario(&mut core, "calm-cruise", 1.0, false);
        core.simulate(ErrorSim::Timeout { duration_ms: 500 });
        for _ in 0..5 {
            assert!(core.tick(0.1).is_empty());
        }
        assert!(!core.tick(0.1).is_empty());
    }

    #[test]
    fn record_timestamps_stay_monotonic_across_loops() {
        let mut core = core();
        let scenario = bridge_core::scenario::ScenarioDefinition {
            name: "short".to_string(),
            duration: 2.0,
            looped: true,
            events: vec![bridge_core::scenario::ScenarioEvent {
                at: 0.0,
                patterns: [(
                    "HDG".to_string(),
                    bridge_core::pattern::PatternSpec::Constant { value: 90.0 },
                )]
                .into_iter()
                .collect(),
                transition: None,
            }],
        };
        core.load(LoadSource::Scenario(scenario), 1.0, true).unwrap();
        let mut last_session_ms = 0.0;
        for _ in 0..60 {
            core.tick(0.1);
            assert!(core.session_ms >= last_session_ms);
            last_session_ms = core.session_ms;
        }
        assert!(core.status().loop_count >= 2);
    }
}
