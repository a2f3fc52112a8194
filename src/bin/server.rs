use std::path::PathBuf;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::json;
use snake_sync_server::constants::{
    DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH, DEFAULT_TICK_SECS, OUTBOUND_QUEUE_CAPACITY,
};
use snake_sync_server::engine::GameOptions;
use snake_sync_server::error::GameError;
use snake_sync_server::hub::{HubConfig, SessionHub, SessionScope};
use snake_sync_server::server_protocol::ServerMessage;
use snake_sync_server::server_utils::resolve_game_options;
use snake_sync_server::session::OutboundMessage;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    PerConnection,
    Shared,
}

impl From<ScopeArg> for SessionScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::PerConnection => SessionScope::PerConnection,
            ScopeArg::Shared => SessionScope::Shared,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8765)]
    port: u16,
    /// Directory with a pre-built front end (must contain index.html)
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// How connections map onto game sessions
    #[arg(long, value_enum, default_value_t = ScopeArg::PerConnection)]
    scope: ScopeArg,
    #[arg(long, default_value_t = DEFAULT_GRID_WIDTH)]
    grid_width: i32,
    #[arg(long, default_value_t = DEFAULT_GRID_HEIGHT)]
    grid_height: i32,
    /// Default seconds between ticks
    #[arg(long, default_value_t = DEFAULT_TICK_SECS)]
    tick: f64,
}

impl Cli {
    fn hub_config(&self) -> Result<HubConfig, GameError> {
        let defaults = resolve_game_options(
            &GameOptions::default(),
            Some(i64::from(self.grid_width)),
            Some(i64::from(self.grid_height)),
            Some(self.tick),
        )?;
        Ok(HubConfig {
            scope: self.scope.into(),
            defaults,
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match cli.hub_config() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    info!(
        "session scope {:?}, default grid {}x{}, tick {}s",
        config.scope,
        config.defaults.grid_width,
        config.defaults.grid_height,
        config.defaults.tick_interval_secs
    );
    let hub = SessionHub::new(config);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ping", get(ping))
        .route("/ws", get(ws_handler))
        .with_state(hub.clone());

    let app = if let Some(static_dir) = resolve_static_dir(cli.static_dir.as_ref()) {
        let index_file = static_dir.join("index.html");
        info!("static file root: {}", static_dir.to_string_lossy());
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving the websocket api only");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    info!("listening on :{}", cli.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .expect("server runtime failed");
}

async fn shutdown_signal(hub: SessionHub) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        return;
    }
    info!("received Ctrl+C, shutting down gracefully");
    hub.close_all("server shutting down").await;
}

fn resolve_static_dir(configured: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path.clone());
        }
        warn!("{} has no index.html", path.to_string_lossy());
    }

    let candidates = [PathBuf::from("static"), PathBuf::from("dist")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<SessionHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: SessionHub, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_CAPACITY);
    let connection_id = hub.connect(tx.clone()).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => hub.handle_message(&connection_id, raw.as_str()).await,
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => hub.handle_message(&connection_id, text).await,
                Err(_) => {
                    let reply =
                        ServerMessage::error(&GameError::invalid("binary frame is not utf-8"));
                    if let Err(err) = tx.try_send(OutboundMessage::Text(reply.encode())) {
                        warn!("connection {connection_id}: reply dropped: {err}");
                    }
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.disconnect(&connection_id).await;
    drop(tx);
    // The peer is gone; a session may still hold a sender until it drains.
    writer.abort();
}
