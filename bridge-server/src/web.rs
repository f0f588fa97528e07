//! REST control plane.
//!
//! External orchestration surface for test harnesses: scenario lifecycle,
//! direct sentence injection, error-condition simulation, recording and
//! playback control, and read-only health/status. All responses are JSON;
//! failures return `{"error": ...}` with a 4xx/5xx status. Mutating endpoints
//! are idempotent where natural - stopping a stopped scenario is a success.

use axum::{
    debug_handler,
    extract::{Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_graceful_shutdown::SubsystemHandle;

use bridge_core::nmea0183;

use crate::config;
use crate::engine::{EngineCommand, EngineState, ErrorSim, LoadSource, SourceKind};
use crate::recording::{
    self, file_format::SourceMode, list_recordings, recording_path, start_recording, NbrReader,
    RecordingStatus,
};
use crate::server::{ProtocolKind, ServerControl};
use crate::{BridgeError, Session, VERSION};

const HEALTH_URI: &str = "/api/health";
const STATUS_URI: &str = "/api/status";
const SCENARIOS_URI: &str = "/api/scenarios";
const SCENARIO_STOP_URI: &str = "/api/scenarios/{name}/stop";
const INJECT_URI: &str = "/api/inject-data";
const SIMULATE_ERROR_URI: &str = "/api/simulate-error";
const RECORDINGS_URI: &str = "/api/recordings";
const RECORDING_START_URI: &str = "/api/recordings/start";
const RECORDING_STOP_URI: &str = "/api/recordings/stop";
const PLAYBACK_URI: &str = "/api/playback";
const PLAYBACK_STOP_URI: &str = "/api/playback/stop";
const PLAYBACK_PAUSE_URI: &str = "/api/playback/pause";
const PLAYBACK_PLAY_URI: &str = "/api/playback/play";

/// Request-scoped API failure: a status code plus a JSON error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::ScenarioNotFound(_) => Self::not_found(e.to_string()),
            BridgeError::Validation(_) => Self::bad_request(e.to_string()),
            BridgeError::Busy(_) => Self::conflict(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Clone)]
pub struct Web {
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            session,
            shutdown_tx,
        }
    }

    pub async fn run(self, subsys: SubsystemHandle, listener: TcpListener) -> Result<(), BridgeError> {
        info!("Control API listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();

        let app = Router::new()
            .route(HEALTH_URI, get(get_health))
            .route(STATUS_URI, get(get_status))
            .route(SCENARIOS_URI, get(get_scenarios).post(start_scenario))
            .route(SCENARIO_STOP_URI, post(stop_scenario))
            .route(INJECT_URI, post(inject_data))
            .route(SIMULATE_ERROR_URI, post(simulate_error))
            .route(RECORDINGS_URI, get(get_recordings))
            .route(RECORDING_START_URI, post(start_recording_handler))
            .route(RECORDING_STOP_URI, post(stop_recording_handler))
            .route(PLAYBACK_URI, post(start_playback))
            .route(PLAYBACK_STOP_URI, post(stop_playback))
            .route(PLAYBACK_PAUSE_URI, post(pause_playback))
            .route(PLAYBACK_PLAY_URI, post(resume_playback))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    }) => {
                return r.map_err(BridgeError::Io);
            }
        }
        Ok(())
    }
}

/// Control responses must never be cached by intermediaries.
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-cache, no-store, must-revalidate".parse().unwrap(),
    );
    response
}

async fn engine_load(
    session: &Session,
    source: LoadSource,
    speed: f64,
    looped: bool,
) -> Result<(), ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    session
        .engine_tx()
        .send(EngineCommand::Load {
            source,
            speed,
            looped,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ApiError::internal("engine unreachable"))?;
    match reply_rx.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(ApiError::conflict(message)),
        Err(_) => Err(ApiError::internal("engine dropped the request")),
    }
}

async fn engine_stop(session: &Session) -> Result<(), ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    session
        .engine_tx()
        .send(EngineCommand::Stop { reply: reply_tx })
        .await
        .map_err(|_| ApiError::internal("engine unreachable"))?;
    reply_rx
        .await
        .map_err(|_| ApiError::internal("engine dropped the request"))
}

#[debug_handler]
async fn get_health(State(state): State<Web>) -> Response {
    let inner = state.session.read().unwrap();
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "uptimeMs": inner.started.elapsed().as_millis() as u64,
        "connections": {
            "tcp": inner.tcp_health.connections(),
            "ws": inner.ws_health.connections(),
        },
        "lastBroadcastMs": {
            "tcp": inner.tcp_health.last_broadcast_ms(),
            "ws": inner.ws_health.last_broadcast_ms(),
        },
    }))
    .into_response()
}

#[debug_handler]
async fn get_status(State(state): State<Web>) -> Response {
    let (status, recording) = {
        let inner = state.session.read().unwrap();
        let status = inner.status_rx.borrow().clone();
        let recording = inner
            .recording
            .as_ref()
            .map(|r| r.status())
            .unwrap_or_default();
        (status, recording)
    };
    Json(json!({
        "engine": status,
        "recording": recording,
    }))
    .into_response()
}

#[debug_handler]
async fn get_scenarios(State(state): State<Web>) -> Response {
    let args = state.session.args();
    let data_dir = config::data_dir(args.data_dir.as_deref());
    Json(json!({ "scenarios": config::list_scenarios(&data_dir) })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartScenarioRequest {
    name: String,
    speed: Option<f64>,
    #[serde(rename = "loop")]
    looped: Option<bool>,
}

#[debug_handler]
async fn start_scenario(
    State(state): State<Web>,
    Json(request): Json<StartScenarioRequest>,
) -> Result<Response, ApiError> {
    let args = state.session.args();
    let data_dir = config::data_dir(args.data_dir.as_deref());
    let scenario = config::load_scenario(&data_dir, &request.name)?;

    let speed = request.speed.unwrap_or(1.0);
    if speed <= 0.0 {
        return Err(ApiError::bad_request("speed must be positive"));
    }
    let looped = request.looped.unwrap_or(scenario.looped);

    engine_load(&state.session, LoadSource::Scenario(scenario), speed, looped).await?;
    info!("Scenario '{}' started via control API", request.name);
    Ok(Json(json!({ "status": "started", "name": request.name })).into_response())
}

#[derive(Deserialize)]
struct ScenarioName {
    name: String,
}

#[debug_handler]
async fn stop_scenario(
    State(state): State<Web>,
    Path(params): Path<ScenarioName>,
) -> Result<Response, ApiError> {
    // Idempotent: stopping when nothing (or this scenario) runs succeeds.
    // Stopping while a *different* scenario runs is a caller bug, flagged.
    let status = state.session.read().unwrap().status_rx.borrow().clone();
    let active = matches!(
        status.state,
        EngineState::Running | EngineState::Paused | EngineState::Looping
    );
    if active {
        if let Some(current) = &status.scenario {
            if current != &params.name {
                return Err(ApiError::conflict(format!(
                    "scenario '{}' is active, not '{}'",
                    current, params.name
                )));
            }
        }
    }
    engine_stop(&state.session).await?;
    Ok(Json(json!({ "status": "stopped", "name": params.name })).into_response())
}

#[derive(Deserialize)]
struct InjectRequest {
    sentence: String,
}

#[debug_handler]
async fn inject_data(
    State(state): State<Web>,
    Json(request): Json<InjectRequest>,
) -> Result<Response, ApiError> {
    // Validate before touching the stream: a bad injected sentence fails the
    // request, it never corrupts the broadcast
    nmea0183::verify(&request.sentence)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut bytes = request.sentence.trim_end().as_bytes().to_vec();
    bytes.extend_from_slice(b"\r\n");
    let receivers = state.session.data_tx().send(bytes).unwrap_or(0);
    debug!("Injected sentence reached {} subscribers", receivers);
    Ok(Json(json!({ "status": "injected" })).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateErrorRequest {
    #[serde(rename = "type")]
    kind: String,
    target: Option<String>,
    count: Option<u32>,
    duration_ms: Option<u64>,
}

#[debug_handler]
async fn simulate_error(
    State(state): State<Web>,
    Json(request): Json<SimulateErrorRequest>,
) -> Result<Response, ApiError> {
    match request.kind.as_str() {
        "checksum" => {
            let count = request.count.unwrap_or(10);
            state
                .session
                .engine_tx()
                .send(EngineCommand::SimulateError(ErrorSim::Checksum { count }))
                .await
                .map_err(|_| ApiError::internal("engine unreachable"))?;
        }
        "timeout" => {
            let duration_ms = request.duration_ms.unwrap_or(5000);
            state
                .session
                .engine_tx()
                .send(EngineCommand::SimulateError(ErrorSim::Timeout { duration_ms }))
                .await
                .map_err(|_| ApiError::internal("engine unreachable"))?;
        }
        "disconnect" => {
            let control = match request.target.as_deref() {
                None | Some("all") => ServerControl::DropAll,
                Some("tcp") => ServerControl::Drop(ProtocolKind::Tcp),
                Some("ws") => ServerControl::Drop(ProtocolKind::Ws),
                Some(other) => match other.parse::<u64>() {
                    Ok(id) => ServerControl::DropConnection(id),
                    Err(_) => {
                        return Err(ApiError::bad_request(format!(
                            "unknown disconnect target '{}'",
                            other
                        )))
                    }
                },
            };
            let _ = state.session.read().unwrap().server_control_tx.send(control);
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown error type '{}'",
                other
            )))
        }
    }
    Ok(Json(json!({ "status": "simulating", "type": request.kind })).into_response())
}

#[debug_handler]
async fn get_recordings(State(state): State<Web>) -> Response {
    let args = state.session.args();
    let data_dir = config::data_dir(args.data_dir.as_deref());
    Json(json!({ "recordings": list_recordings(&data_dir) })).into_response()
}

#[derive(Deserialize)]
struct StartRecordingRequest {
    filename: Option<String>,
}

#[debug_handler]
async fn start_recording_handler(
    State(state): State<Web>,
    request: Option<Json<StartRecordingRequest>>,
) -> Result<Response, ApiError> {
    let request = request
        .map(|Json(r)| r)
        .unwrap_or(StartRecordingRequest { filename: None });
    {
        let inner = state.session.read().unwrap();
        if inner.recording.as_ref().is_some_and(|r| r.is_running()) {
            return Err(ApiError::conflict("a recording is already active"));
        }
    }

    let args = state.session.args();
    let data_dir = config::data_dir(args.data_dir.as_deref());
    let filename = request
        .filename
        .unwrap_or_else(recording::manager::generate_filename);
    let path = recording_path(&data_dir, &filename);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ApiError::internal(e.to_string()))?;
    }

    let source_mode = match state.session.read().unwrap().status_rx.borrow().source {
        SourceKind::Live => SourceMode::Live,
        SourceKind::Playback => SourceMode::Playback,
        SourceKind::Scenario => SourceMode::Scenario,
        _ => SourceMode::FreeRun,
    };

    let data_rx = state.session.data_tx().subscribe();
    let active = start_recording(data_rx, path, source_mode).map_err(ApiError::conflict)?;
    let status = active.status();
    state.session.write().unwrap().recording = Some(active);
    Ok(Json(status).into_response())
}

#[debug_handler]
async fn stop_recording_handler(State(state): State<Web>) -> Response {
    let status = {
        let mut inner = state.session.write().unwrap();
        match inner.recording.take() {
            Some(active) => {
                active.stop();
                active.status()
            }
            // Idempotent: stopping with no recording active is a no-op
            None => RecordingStatus::default(),
        }
    };
    Json(status).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPlaybackRequest {
    filename: String,
    speed: Option<f64>,
    #[serde(rename = "loop")]
    looped: Option<bool>,
}

#[debug_handler]
async fn start_playback(
    State(state): State<Web>,
    Json(request): Json<StartPlaybackRequest>,
) -> Result<Response, ApiError> {
    let args = state.session.args();
    let data_dir = config::data_dir(args.data_dir.as_deref());
    let path = recording_path(&data_dir, &request.filename);
    if !path.is_file() {
        return Err(ApiError::not_found(format!(
            "recording '{}' not found",
            request.filename
        )));
    }

    let file = std::fs::File::open(&path).map_err(|e| ApiError::internal(e.to_string()))?;
    let reader = NbrReader::open(std::io::BufReader::new(file))
        .map_err(|e| ApiError::bad_request(format!("unreadable recording: {}", e)))?;
    let (_, frames) = reader
        .read_all()
        .map_err(|e| ApiError::bad_request(format!("corrupt recording: {}", e)))?;

    let speed = request.speed.unwrap_or(1.0);
    if speed <= 0.0 {
        return Err(ApiError::bad_request("speed must be positive"));
    }
    let looped = request.looped.unwrap_or(false);

    engine_load(
        &state.session,
        LoadSource::Replay {
            name: request.filename.clone(),
            frames,
        },
        speed,
        looped,
    )
    .await?;
    info!("Playback of '{}' started via control API", request.filename);
    Ok(Json(json!({ "status": "playing", "filename": request.filename })).into_response())
}

#[debug_handler]
async fn stop_playback(State(state): State<Web>) -> Result<Response, ApiError> {
    engine_stop(&state.session).await?;
    Ok(Json(json!({ "status": "stopped" })).into_response())
}

#[debug_handler]
async fn pause_playback(State(state): State<Web>) -> Result<Response, ApiError> {
    state
        .session
        .engine_tx()
        .send(EngineCommand::Pause)
        .await
        .map_err(|_| ApiError::internal("engine unreachable"))?;
    Ok(Json(json!({ "status": "paused" })).into_response())
}

#[debug_handler]
async fn resume_playback(State(state): State<Web>) -> Result<Response, ApiError> {
    state
        .session
        .engine_tx()
        .send(EngineCommand::Resume)
        .await
        .map_err(|_| ApiError::internal("engine unreachable"))?;
    Ok(Json(json!({ "status": "playing" })).into_response())
}
