//! Raw NMEA TCP server.
//!
//! Accepts stream connections and writes every broadcast payload to each of
//! them. Reads flow the other way: command frames are parsed out of the
//! inbound stream (lines in NMEA 0183 mode, length-prefixed binary frames in
//! NMEA 2000 mode) and handed to the command channel.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use bridge_core::command::CommandReply;
use bridge_core::WireProtocol;

use super::{
    encode_reply, ingest_binary, ingest_text_line, next_connection_id, ClientConnection,
    ConnectionRegistry, ProtocolKind, ServerControl, ServerHealth,
};
use crate::command::IncomingCommand;
use crate::{BridgeError, Session};

pub struct TcpServer {
    session: Session,
    listener: TcpListener,
    registry: ConnectionRegistry,
    health: Arc<ServerHealth>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpServer {
    /// The listener is bound by the caller so bind failures surface as a
    /// startup error, not a degraded server.
    pub fn new(session: Session, listener: TcpListener) -> Self {
        let health = session.read().unwrap().tcp_health.clone();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            session,
            listener,
            registry: ConnectionRegistry::default(),
            health,
            shutdown_tx,
        }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), BridgeError> {
        info!(
            "TCP NMEA server listening on {}",
            self.listener.local_addr()?
        );
        loop {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    let _ = self.shutdown_tx.send(());
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => warn!("TCP accept failed: {}", e),
                },
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let conn_id = next_connection_id();
        info!("TCP client {} connected from {}", conn_id, peer);

        self.registry
            .write()
            .unwrap()
            .insert(conn_id, ClientConnection::new(conn_id, ProtocolKind::Tcp, peer));
        self.health.connected();

        let protocol = self.session.protocol();
        let (data_rx, control_rx, command_tx) = {
            let inner = self.session.read().unwrap();
            (
                inner.data_tx.subscribe(),
                inner.server_control_tx.subscribe(),
                inner.command_tx.clone(),
            )
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let (reply_tx, reply_rx) = mpsc::channel(8);
        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();

        let registry = self.registry.clone();
        let health = self.health.clone();

        let writer = tokio::spawn(write_loop(
            write_half,
            data_rx,
            reply_rx,
            control_rx,
            shutdown_rx,
            cancel.clone(),
            health.clone(),
            protocol,
            conn_id,
        ));
        let reader = tokio::spawn(read_loop(
            read_half,
            protocol,
            conn_id,
            registry.clone(),
            command_tx,
            reply_tx,
            cancel.clone(),
        ));

        // Teardown: wait for both halves, then deregister. Runs off the
        // accept loop so cleanup never blocks other accepts or the broadcast.
        tokio::spawn(async move {
            let _ = tokio::join!(writer, reader);
            registry.write().unwrap().remove(&conn_id);
            health.disconnected();
            info!("TCP client {} disconnected", conn_id);
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut data_rx: broadcast::Receiver<Vec<u8>>,
    mut reply_rx: mpsc::Receiver<CommandReply>,
    mut control_rx: broadcast::Receiver<ServerControl>,
    mut shutdown_rx: broadcast::Receiver<()>,
    cancel: CancellationToken,
    health: Arc<ServerHealth>,
    protocol: WireProtocol,
    conn_id: u64,
) {
    loop {
        tokio::select! { biased;
            _ = cancel.cancelled() => break,
            _ = shutdown_rx.recv() => break,
            control = control_rx.recv() => {
                if let Ok(control) = control {
                    if control.applies_to(ProtocolKind::Tcp, conn_id) {
                        info!("Dropping TCP client {} (simulated disconnect)", conn_id);
                        break;
                    }
                }
            },
            Some(reply) = reply_rx.recv() => {
                let bytes = encode_reply(&reply, protocol);
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            },
            payload = data_rx.recv() => match payload {
                Ok(bytes) => {
                    if let Err(e) = write_half.write_all(&bytes).await {
                        debug!("TCP write to {} failed: {}", conn_id, e);
                        break;
                    }
                    health.touch_broadcast();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Slow client: drop the oldest payloads, keep streaming
                    warn!("TCP client {} lagged, skipped {} payloads", conn_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    cancel.cancel();
}

async fn read_loop(
    read_half: OwnedReadHalf,
    protocol: WireProtocol,
    conn_id: u64,
    registry: ConnectionRegistry,
    command_tx: mpsc::Sender<IncomingCommand>,
    reply_tx: mpsc::Sender<CommandReply>,
    cancel: CancellationToken,
) {
    match protocol {
        WireProtocol::Nmea0183 => {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            ingest_text_line(
                                &line,
                                conn_id,
                                ProtocolKind::Tcp,
                                &registry,
                                &command_tx,
                                &reply_tx,
                            )
                            .await;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("TCP read from {} failed: {}", conn_id, e);
                            break;
                        }
                    },
                }
            }
        }
        WireProtocol::Nmea2000 => {
            let mut read_half = read_half;
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = read_half.read(&mut chunk) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            buffer.extend_from_slice(&chunk[..n]);
                            ingest_binary(
                                &mut buffer,
                                conn_id,
                                ProtocolKind::Tcp,
                                &registry,
                                &command_tx,
                                &reply_tx,
                            )
                            .await;
                        }
                        Err(e) => {
                            debug!("TCP read from {} failed: {}", conn_id, e);
                            break;
                        }
                    },
                }
            }
        }
    }
    cancel.cancel();
}
