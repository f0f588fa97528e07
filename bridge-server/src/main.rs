use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use tokio::net::TcpListener;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use bridge_server::command::CommandChannel;
use bridge_server::config;
use bridge_server::engine::{Engine, LoadSource};
use bridge_server::recording::NbrReader;
use bridge_server::server::{tcp::TcpServer, ws::WsServer};
use bridge_server::web::Web;
use bridge_server::{BridgeError, Cli, Session, SessionChannels, VERSION};

/// Exit code for scenario load/validation failures.
const EXIT_LOAD_ERROR: i32 = 1;
/// Exit code for port bind failures.
const EXIT_BIND_ERROR: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();
    info!("NMEA bridge simulator {}", VERSION);

    // Resolve and validate the startup mode first: a bad scenario or
    // recording must fail fast, before anything listens
    let initial = match resolve_initial(&args) {
        Ok(initial) => initial,
        Err(e) => {
            eprintln!("bridge: {}", e);
            std::process::exit(EXIT_LOAD_ERROR);
        }
    };

    // Bind every port up front - no partial or degraded startup
    let tcp_listener = bind(args.tcp_port, "TCP data").await;
    let ws_listener = bind(args.ws_port, "WebSocket").await;
    let api_listener = bind(args.api_port, "control API").await;

    let (session, channels) = Session::new(args);

    Toplevel::new(move |s| async move {
        let SessionChannels {
            engine_rx,
            status_tx,
            command_rx,
        } = channels;

        let engine = Engine::new(&session, engine_rx, status_tx, Some(initial));
        s.start(SubsystemBuilder::new("Engine", move |subsys| {
            engine.run(subsys)
        }));

        let command_channel = CommandChannel::new(command_rx, session.engine_tx());
        s.start(SubsystemBuilder::new("CommandChannel", move |subsys| {
            command_channel.run(subsys)
        }));

        let tcp_server = TcpServer::new(session.clone(), tcp_listener);
        s.start(SubsystemBuilder::new("TcpServer", move |subsys| {
            tcp_server.run(subsys)
        }));

        let ws_server = WsServer::new(session.clone(), ws_listener);
        s.start(SubsystemBuilder::new("WsServer", move |subsys| {
            ws_server.run(subsys)
        }));

        let web = Web::new(session.clone());
        s.start(SubsystemBuilder::new("ControlApi", move |subsys| {
            web.run(subsys, api_listener)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}

/// Translate the CLI invocation mode into the engine's initial load.
fn resolve_initial(args: &Cli) -> Result<(LoadSource, f64, bool), BridgeError> {
    if let Some(live) = &args.live {
        let host = live[0].clone();
        let port: u16 = live[1].parse().map_err(|_| {
            BridgeError::InvalidArgument(format!("invalid live port '{}'", live[1]))
        })?;
        return Ok((LoadSource::Live { host, port }, 1.0, false));
    }

    if let Some(path) = &args.file {
        let file = std::fs::File::open(path)?;
        let reader = NbrReader::open(std::io::BufReader::new(file))?;
        let (_, frames) = reader.read_all()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        return Ok((
            LoadSource::Replay { name, frames },
            args.rate,
            args.looped,
        ));
    }

    if let Some(name) = &args.scenario {
        let data_dir = config::data_dir(args.data_dir.as_deref());
        let scenario = config::load_scenario(&data_dir, name)?;
        let looped = args.looped || scenario.looped;
        return Ok((LoadSource::Scenario(scenario), args.speed, looped));
    }

    Ok((LoadSource::FreeRun, 1.0, false))
}

async fn bind(port: u16, what: &str) -> TcpListener {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("bridge: cannot bind {} port {}: {}", what, port, e);
            std::process::exit(EXIT_BIND_ERROR);
        }
    }
}
