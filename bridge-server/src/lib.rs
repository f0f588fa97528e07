//! # Bridge Server
//!
//! NMEA bridge simulator: emulates a marine instrument network (NMEA 0183 or
//! NMEA 2000 over a WiFi bridge) for development and automated testing.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       bridge-server                        │
//! │  ┌────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ TCP stream │  │ WebSocket   │  │ Control API (axum)  │  │
//! │  │ (raw NMEA) │  │ stream      │  │ health/scenarios/.. │  │
//! │  └─────▲──────┘  └──────▲──────┘  └──────────┬──────────┘  │
//! │        │ broadcast      │ broadcast          │ commands    │
//! │  ┌─────┴────────────────┴─────────┐  ┌───────▼──────────┐  │
//! │  │  encoded sentence broadcast    ◄──┤  Scenario Engine │  │
//! │  │  (tokio broadcast, cap 1000)   │  │  (virtual clock, │  │
//! │  └─────▲──────────────────────────┘  │  generator, APs) │  │
//! │        │                             └───────▲──────────┘  │
//! │  ┌─────┴──────────┐                  ┌───────┴──────────┐  │
//! │  │ Recorder/Player│                  │ Command Channel  │  │
//! │  └────────────────┘                  └──────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scenario engine exclusively owns the virtual clock and the autopilot
//! state; everything else talks to it through [`engine::EngineCommand`]
//! messages. Protocol servers each own their connection set and subscribe to
//! the broadcast channel, so data production never races transport fan-out.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use bridge_core::WireProtocol;

pub mod command;
pub mod config;
pub mod engine;
pub mod recording;
pub mod server;
pub mod web;

use command::IncomingCommand;
use engine::{EngineCommand, EngineStatus};
use recording::recorder::ActiveRecording;
use server::{ServerControl, ServerHealth};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bounded broadcast queue: a stalled client lags and drops the oldest
/// entries instead of stalling the tick loop.
pub const BROADCAST_CAPACITY: usize = 1000;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("socket operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario '{0}' not found")]
    ScenarioNotFound(String),
    #[error(transparent)]
    Validation(#[from] bridge_core::ValidationError),
    #[error("recording: {0}")]
    Recording(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Busy(String),
    #[error("engine is not reachable")]
    EngineGone,
}

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolArg {
    #[default]
    Nmea0183,
    Nmea2000,
}

impl From<ProtocolArg> for WireProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Nmea0183 => WireProtocol::Nmea0183,
            ProtocolArg::Nmea2000 => WireProtocol::Nmea2000,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "bridge", version = VERSION, about = "NMEA bridge simulator")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Pass a live NMEA gateway stream through: --live <host> <port>
    #[arg(long, num_args = 2, value_names = ["HOST", "PORT"], conflicts_with_all = ["file", "scenario"])]
    pub live: Option<Vec<String>>,

    /// Replay a recorded session file
    #[arg(long, conflicts_with = "scenario")]
    pub file: Option<PathBuf>,

    /// Playback rate multiplier for --file
    #[arg(long, default_value_t = 1.0)]
    pub rate: f64,

    /// Run a named scenario
    #[arg(long)]
    pub scenario: Option<String>,

    /// Virtual clock speed multiplier for --scenario
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Loop the scenario or file when it reaches its end
    #[arg(long = "loop", default_value_t = false)]
    pub looped: bool,

    /// Port for the raw NMEA TCP stream
    #[arg(long, default_value_t = 2000)]
    pub tcp_port: u16,

    /// Port for the WebSocket stream
    #[arg(long, default_value_t = 8080)]
    pub ws_port: u16,

    /// Port for the REST control API
    #[arg(long, default_value_t = 9090)]
    pub api_port: u16,

    /// Wire protocol spoken on the data ports
    #[arg(long, value_enum, default_value_t)]
    pub protocol: ProtocolArg,

    /// Seed for deterministic telemetry generation
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Override the data directory holding scenarios/ and recordings/
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

pub struct SessionInner {
    pub args: Cli,
    /// Encoded wire payloads, one sentence or PGN frame per message.
    pub data_tx: broadcast::Sender<Vec<u8>>,
    /// Mutation path into the scenario engine task.
    pub engine_tx: mpsc::Sender<EngineCommand>,
    /// Latest engine status snapshot.
    pub status_rx: watch::Receiver<EngineStatus>,
    /// Ingestion path into the command channel task.
    pub command_tx: mpsc::Sender<IncomingCommand>,
    /// Out-of-band control of the protocol servers (forced disconnects).
    pub server_control_tx: broadcast::Sender<ServerControl>,
    pub tcp_health: Arc<ServerHealth>,
    pub ws_health: Arc<ServerHealth>,
    pub started: Instant,
    /// Active session recording, if any. Mutated by the control API.
    pub recording: Option<ActiveRecording>,
}

/// Receiver halves handed to the subsystem tasks at startup.
pub struct SessionChannels {
    pub engine_rx: mpsc::Receiver<EngineCommand>,
    pub status_tx: watch::Sender<EngineStatus>,
    pub command_rx: mpsc::Receiver<IncomingCommand>,
}

/// Shared application state container.
#[derive(Clone)]
pub struct Session {
    pub inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn new(args: Cli) -> (Self, SessionChannels) {
        let (data_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (engine_tx, engine_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(EngineStatus::idle());
        let (command_tx, command_rx) = mpsc::channel(64);
        let (server_control_tx, _) = broadcast::channel(16);

        let session = Session {
            inner: Arc::new(RwLock::new(SessionInner {
                args,
                data_tx,
                engine_tx,
                status_rx,
                command_tx,
                server_control_tx,
                tcp_health: Arc::new(ServerHealth::default()),
                ws_health: Arc::new(ServerHealth::default()),
                started: Instant::now(),
                recording: None,
            })),
        };
        (
            session,
            SessionChannels {
                engine_rx,
                status_tx,
                command_rx,
            },
        )
    }

    pub fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, SessionInner>, PoisonError<RwLockReadGuard<'_, SessionInner>>>
    {
        self.inner.read()
    }

    pub fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, SessionInner>, PoisonError<RwLockWriteGuard<'_, SessionInner>>>
    {
        self.inner.write()
    }

    pub fn args(&self) -> Cli {
        self.read().unwrap().args.clone()
    }

    pub fn protocol(&self) -> WireProtocol {
        self.read().unwrap().args.protocol.into()
    }

    pub fn data_tx(&self) -> broadcast::Sender<Vec<u8>> {
        self.read().unwrap().data_tx.clone()
    }

    pub fn engine_tx(&self) -> mpsc::Sender<EngineCommand> {
        self.read().unwrap().engine_tx.clone()
    }

}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}
