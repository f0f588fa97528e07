//! Tick sources: generated, replayed or live.
//!
//! Generated scenarios and recorded sessions run behind the same `Running`
//! machinery in the engine, so the protocol servers and the control API never
//! need to know which is active. Live passthrough is the odd one out: its
//! reader task pushes upstream sentences straight onto the broadcast channel
//! while the engine only keeps the clock.

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use bridge_core::scenario::ScenarioDefinition;

use super::SourceKind;
use crate::recording::RecordedFrame;

/// Reconnect delay for the live upstream reader.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// What a caller asks the engine to run.
pub enum LoadSource {
    /// Baseline generated telemetry, no scenario.
    FreeRun,
    /// A validated scenario definition.
    Scenario(ScenarioDefinition),
    /// Frames loaded from an NBR recording.
    Replay {
        name: String,
        frames: Vec<RecordedFrame>,
    },
    /// Pass a live upstream NMEA gateway through.
    Live { host: String, port: u16 },
}

/// The engine's internal per-source state.
pub enum TickSource {
    Idle,
    FreeRun,
    Scenario {
        scenario: ScenarioDefinition,
        event_idx: usize,
    },
    Replay {
        frames: Vec<RecordedFrame>,
        idx: usize,
    },
    Live,
}

impl TickSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            TickSource::Idle => SourceKind::None,
            TickSource::FreeRun => SourceKind::FreeRun,
            TickSource::Scenario { .. } => SourceKind::Scenario,
            TickSource::Replay { .. } => SourceKind::Playback,
            TickSource::Live => SourceKind::Live,
        }
    }

    /// Reset per-pass cursors for a loop wrap. Pattern accumulators and
    /// connection state are deliberately untouched.
    pub fn rewind(&mut self) {
        match self {
            TickSource::Scenario { event_idx, .. } => *event_idx = 0,
            TickSource::Replay { idx, .. } => *idx = 0,
            _ => {}
        }
    }
}

/// Spawn the live upstream reader.
///
/// Connects to `host:port`, forwards each received line onto the broadcast
/// channel and reconnects with a delay on failure, until cancelled.
pub fn spawn_live_reader(
    host: String,
    port: u16,
    data_tx: broadcast::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => return,
                result = TcpStream::connect((host.as_str(), port)) => match result {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Live upstream {}:{} unreachable: {}", host, port, e);
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        }
                    }
                },
            };
            info!("Connected to live upstream {}:{}", host, port);

            let mut lines = BufReader::new(stream).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let mut bytes = line.into_bytes();
                            bytes.extend_from_slice(b"\r\n");
                            let _ = data_tx.send(bytes);
                        }
                        Ok(None) => {
                            debug!("Live upstream closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!("Live upstream read failed: {}", e);
                            break;
                        }
                    },
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    });
}
