//! Protocol servers: TCP and WebSocket data streams.
//!
//! Both servers subscribe to the same broadcast channel the engine feeds and
//! fan payloads out to their own connection sets. Each server exclusively
//! owns its registry - nothing outside the server inspects or mutates it, so
//! client connect/disconnect cannot race an active broadcast.
//!
//! Every connection runs a read task (command ingestion) and a write task
//! (broadcast drain), coordinated only through that connection's channels. A
//! stalled client lags on its own broadcast receiver and skips the oldest
//! payloads; everyone else keeps streaming.

pub mod tcp;
pub mod ws;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use bridge_core::command::{self, CommandReply};
use bridge_core::WireProtocol;

use crate::command::IncomingCommand;

/// Which transport a connection arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Tcp,
    Ws,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Tcp => write!(f, "tcp"),
            ProtocolKind::Ws => write!(f, "ws"),
        }
    }
}

/// Out-of-band server control, used by error simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerControl {
    /// Drop every connection on both servers.
    DropAll,
    /// Drop every connection on one server.
    Drop(ProtocolKind),
    /// Drop one connection.
    DropConnection(u64),
}

impl ServerControl {
    /// Whether this control message applies to the given connection.
    pub fn applies_to(&self, protocol: ProtocolKind, conn_id: u64) -> bool {
        match self {
            ServerControl::DropAll => true,
            ServerControl::Drop(kind) => *kind == protocol,
            ServerControl::DropConnection(id) => *id == conn_id,
        }
    }
}

/// Per-server health counters for the control API.
#[derive(Debug, Default)]
pub struct ServerHealth {
    connections: AtomicUsize,
    last_broadcast_ms: AtomicU64,
}

impl ServerHealth {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn last_broadcast_ms(&self) -> Option<u64> {
        match self.last_broadcast_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub(crate) fn connected(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disconnected(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn touch_broadcast(&self) {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_broadcast_ms.store(now, Ordering::Relaxed);
    }
}

/// One connected client. Created on accept, destroyed on disconnect; never
/// outlives its socket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnection {
    pub id: u64,
    pub protocol: ProtocolKind,
    pub peer: SocketAddr,
    /// Unix ms at accept.
    pub connected_at_ms: u64,
    /// Unix ms of the last inbound traffic.
    pub last_activity_ms: u64,
    /// Whether this client has sent a command (opted into bidirectional mode).
    pub commands: bool,
}

impl ClientConnection {
    pub fn new(id: u64, protocol: ProtocolKind, peer: SocketAddr) -> Self {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self {
            id,
            protocol,
            peer,
            connected_at_ms: now,
            last_activity_ms: now,
            commands: false,
        }
    }
}

/// Connection set, owned exclusively by one protocol server.
pub type ConnectionRegistry = Arc<RwLock<HashMap<u64, ClientConnection>>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Globally unique connection id, shared across both servers so control-API
/// targets are unambiguous.
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Note inbound traffic on a connection, marking command opt-in if set.
pub(crate) fn touch_connection(registry: &ConnectionRegistry, conn_id: u64, command: bool) {
    if let Ok(mut registry) = registry.write() {
        if let Some(connection) = registry.get_mut(&conn_id) {
            connection.last_activity_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
            if command {
                connection.commands = true;
            }
        }
    }
}

/// Encode a command reply for the wire protocol of the data stream.
pub(crate) fn encode_reply(reply: &CommandReply, protocol: WireProtocol) -> Vec<u8> {
    match protocol {
        WireProtocol::Nmea0183 => reply.to_sentence().into_bytes(),
        WireProtocol::Nmea2000 => reply.to_binary(),
    }
}

/// Hand one inbound text line to the command channel if it is a command.
///
/// Returns whether the line was a command frame. Non-command chatter is
/// ignored - clients may echo anything.
pub(crate) async fn ingest_text_line(
    line: &str,
    conn_id: u64,
    protocol: ProtocolKind,
    registry: &ConnectionRegistry,
    command_tx: &mpsc::Sender<IncomingCommand>,
    reply_tx: &mpsc::Sender<CommandReply>,
) -> bool {
    let is_command = command::is_command_sentence(line);
    touch_connection(registry, conn_id, is_command);
    if !is_command {
        return false;
    }
    let frame = command::parse_sentence(line);
    let incoming = IncomingCommand {
        conn_id,
        protocol,
        frame,
        reply: reply_tx.clone(),
    };
    if command_tx.send(incoming).await.is_err() {
        debug!("Command channel gone, dropping command from {}", conn_id);
    }
    true
}

/// Hand inbound binary data to the command channel. `buffer` accumulates
/// partial frames across reads; complete frames are consumed from its front.
pub(crate) async fn ingest_binary(
    buffer: &mut Vec<u8>,
    conn_id: u64,
    protocol: ProtocolKind,
    registry: &ConnectionRegistry,
    command_tx: &mpsc::Sender<IncomingCommand>,
    reply_tx: &mpsc::Sender<CommandReply>,
) {
    loop {
        if buffer.len() < 2 {
            return;
        }
        if !command::is_command_binary(buffer) {
            // Not a command frame: skip a byte and resync on the magic
            buffer.remove(0);
            continue;
        }
        match command::parse_binary(buffer) {
            Ok(Some((frame, consumed))) => {
                buffer.drain(..consumed);
                touch_connection(registry, conn_id, true);
                let incoming = IncomingCommand {
                    conn_id,
                    protocol,
                    frame: Ok(frame),
                    reply: reply_tx.clone(),
                };
                if command_tx.send(incoming).await.is_err() {
                    debug!("Command channel gone, dropping command from {}", conn_id);
                }
            }
            Ok(None) => return, // incomplete frame, wait for more bytes
            Err(e) => {
                touch_connection(registry, conn_id, true);
                let incoming = IncomingCommand {
                    conn_id,
                    protocol,
                    frame: Err(e),
                    reply: reply_tx.clone(),
                };
                if command_tx.send(incoming).await.is_err() {
                    debug!("Command channel gone, dropping command from {}", conn_id);
                }
                // Drop the bad frame's magic so we do not loop on it
                buffer.drain(..2.min(buffer.len()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert!(b > a);
    }

    #[test]
    fn control_targeting() {
        assert!(ServerControl::DropAll.applies_to(ProtocolKind::Tcp, 1));
        assert!(ServerControl::Drop(ProtocolKind::Ws).applies_to(ProtocolKind::Ws, 5));
        assert!(!ServerControl::Drop(ProtocolKind::Ws).applies_to(ProtocolKind::Tcp, 5));
        assert!(ServerControl::DropConnection(7).applies_to(ProtocolKind::Tcp, 7));
        assert!(!ServerControl::DropConnection(7).applies_to(ProtocolKind::Tcp, 8));
    }

    #[test]
    fn health_counters() {
        let health = ServerHealth::default();
        assert_eq!(health.connections(), 0);
        assert_eq!(health.last_broadcast_ms(), None);
        health.connected();
        health.connected();
        health.disconnected();
        assert_eq!(health.connections(), 1);
        health.touch_broadcast();
        assert!(health.last_broadcast_ms().is_some());
    }

    #[tokio::test]
    async fn text_commands_reach_the_channel() {
        let registry: ConnectionRegistry = Default::default();
        registry.write().unwrap().insert(
            1,
            ClientConnection::new(1, ProtocolKind::Tcp, "127.0.0.1:9999".parse().unwrap()),
        );
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (reply_tx, _reply_rx) = mpsc::channel(4);

        let sentence =
            bridge_core::command::to_sentence(&bridge_core::command::BridgeCommand::Disengage);
        let was_command = ingest_text_line(
            sentence.trim_end(),
            1,
            ProtocolKind::Tcp,
            &registry,
            &command_tx,
            &reply_tx,
        )
        .await;
        assert!(was_command);

        let incoming = command_rx.recv().await.unwrap();
        assert_eq!(incoming.conn_id, 1);
        assert!(incoming.frame.is_ok());
        assert!(registry.read().unwrap().get(&1).unwrap().commands);
    }

    #[tokio::test]
    async fn non_command_lines_are_ignored() {
        let registry: ConnectionRegistry = Default::default();
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (reply_tx, _reply_rx) = mpsc::channel(4);
        let was_command = ingest_text_line(
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A",
            1,
            ProtocolKind::Tcp,
            &registry,
            &command_tx,
            &reply_tx,
        )
        .await;
        assert!(!was_command);
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_commands_frame_across_split_reads() {
        let registry: ConnectionRegistry = Default::default();
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (reply_tx, _reply_rx) = mpsc::channel(4);

        let bytes =
            bridge_core::command::to_binary(&bridge_core::command::BridgeCommand::Disengage);
        let (first, second) = bytes.split_at(3);

        let mut buffer = Vec::new();
        buffer.extend_from_slice(first);
        ingest_binary(
            &mut buffer,
            2,
            ProtocolKind::Ws,
            &registry,
            &command_tx,
            &reply_tx,
        )
        .await;
        assert!(command_rx.try_recv().is_err());

        buffer.extend_from_slice(second);
        ingest_binary(
            &mut buffer,
            2,
            ProtocolKind::Ws,
            &registry,
            &command_tx,
            &reply_tx,
        )
        .await;
        let incoming = command_rx.recv().await.unwrap();
        assert_eq!(
            incoming.frame.unwrap(),
            bridge_core::command::BridgeCommand::Disengage
        );
        assert!(buffer.is_empty());
    }
}
