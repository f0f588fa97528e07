//! WebSocket data server.
//!
//! Serves the same broadcast stream as the TCP server, framed as WebSocket
//! messages: text frames carrying sentences in NMEA 0183 mode, binary frames
//! carrying PGN bytes in NMEA 2000 mode. Inbound messages are command frames,
//! ingested exactly like the TCP read path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use log::{debug, info, warn};
use tokio::net::TcpListener;
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

pub struct WsServer {
    session: Session,
    listener: TcpListener,
    registry: ConnectionRegistry,
    health: Arc<ServerHealth>,
    shutdown_tx: broadcast::Sender<()>,
}

#[derive(Clone)]
struct WsState {
    session: Session,
    registry: ConnectionRegistry,
    health: Arc<ServerHealth>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsServer {
    pub fn new(session: Session, listener: TcpListener) -> Self {
        let health = session.read().unwrap().ws_health.clone();
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
            "WebSocket server listening on {}",
            self.listener.local_addr()?
        );

        let state = WsState {
            session: self.session,
            registry: self.registry,
            health: self.health,
            shutdown_tx: self.shutdown_tx.clone(),
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx;

        let app = Router::new()
            .route("/", get(ws_handler))
            .route("/nmea", get(ws_handler))
            .with_state(state)
            .into_make_service_with_connect_info::<SocketAddr>();

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(self.listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    }) => {
                return r.map_err(BridgeError::Io);
            }
        }
        Ok(())
    }
}

async fn ws_handler(
    State(state): State<WsState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("WebSocket upgrade from {}", addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// One task pair per connection, joined for teardown like the TCP server.
async fn handle_socket(socket: WebSocket, state: WsState, peer: SocketAddr) {
    let conn_id = next_connection_id();
    info!("WS client {} connected from {}", conn_id, peer);

    state
        .registry
        .write()
        .unwrap()
        .insert(conn_id, ClientConnection::new(conn_id, ProtocolKind::Ws, peer));
    state.health.connected();

    let protocol = state.session.protocol();
    let (data_rx, control_rx, command_tx) = {
        let inner = state.session.read().unwrap();
        (
            inner.data_tx.subscribe(),
            inner.server_control_tx.subscribe(),
            inner.command_tx.clone(),
        )
    };
    let shutdown_rx = state.shutdown_tx.subscribe();
    let (reply_tx, reply_rx) = mpsc::channel(8);
    let (sender, receiver) = socket.split();
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(write_loop(
        sender,
        data_rx,
        reply_rx,
        control_rx,
        shutdown_rx,
        cancel.clone(),
        state.health.clone(),
        protocol,
        conn_id,
    ));
    let reader = tokio::spawn(read_loop(
        receiver,
        conn_id,
        state.registry.clone(),
        command_tx,
        reply_tx,
        cancel.clone(),
    ));

    let _ = tokio::join!(writer, reader);
    state.registry.write().unwrap().remove(&conn_id);
    state.health.disconnected();
    info!("WS client {} disconnected", conn_id);
}

fn to_ws_message(bytes: Vec<u8>, protocol: WireProtocol) -> Option<Message> {
    match protocol {
        WireProtocol::Nmea0183 => match String::from_utf8(bytes) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(_) => None,
        },
        WireProtocol::Nmea2000 => Some(Message::Binary(bytes.into())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
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
                    if control.applies_to(ProtocolKind::Ws, conn_id) {
                        info!("Dropping WS client {} (simulated disconnect)", conn_id);
                        break;
                    }
                }
            },
            Some(reply) = reply_rx.recv() => {
                let Some(message) = to_ws_message(encode_reply(&reply, protocol), protocol) else {
                    continue;
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            },
            payload = data_rx.recv() => match payload {
                Ok(bytes) => {
                    let Some(message) = to_ws_message(bytes, protocol) else { continue };
                    if let Err(e) = sender.send(message).await {
                        debug!("WS send to {} failed: {}", conn_id, e);
                        break;
                    }
                    health.touch_broadcast();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WS client {} lagged, skipped {} payloads", conn_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    cancel.cancel();
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    conn_id: u64,
    registry: ConnectionRegistry,
    command_tx: mpsc::Sender<IncomingCommand>,
    reply_tx: mpsc::Sender<CommandReply>,
    cancel: CancellationToken,
) {
    let mut binary_buffer = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    ingest_text_line(
                        text.as_str(),
                        conn_id,
                        ProtocolKind::Ws,
                        &registry,
                        &command_tx,
                        &reply_tx,
                    )
                    .await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    binary_buffer.extend_from_slice(&bytes);
                    ingest_binary(
                        &mut binary_buffer,
                        conn_id,
                        ProtocolKind::Ws,
                        &registry,
                        &command_tx,
                        &reply_tx,
                    )
                    .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong handled by the stack
                Some(Err(e)) => {
                    debug!("WS read from {} failed: {}", conn_id, e);
                    break;
                }
            },
        }
    }
    cancel.cancel();
}
