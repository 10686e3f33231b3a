//! Answers relay peers asking for live values, data or rates. Peers either
//! keep a WebSocket open on `/ws` or post single JSON messages to `/relay`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay_publisher::RelayMessage;
use crate::snapshot::MeterSnapshot;
use crate::tariff::Tariffs;

#[derive(Clone)]
pub struct RelayContext {
    snapshots: watch::Receiver<MeterSnapshot>,
    tariffs: Tariffs,
    allowed: Arc<Vec<IpAddr>>,
}

impl RelayContext {
    /// An empty allow-list accepts every remote address
    pub fn new(snapshots: watch::Receiver<MeterSnapshot>, tariffs: Tariffs, allowed: Vec<IpAddr>) -> Self {
        Self {
            snapshots,
            tariffs,
            allowed: Arc::new(allowed),
        }
    }

    fn is_allowed(&self, remote: &IpAddr) -> bool {
        self.allowed.is_empty() || self.allowed.contains(remote)
    }
}

pub fn router(ctx: RelayContext) -> Router {
    Router::new()
        .route("/ws", get(upgrade_socket))
        .route("/relay", post(handle_post))
        .with_state(ctx)
}

/// Serves the relay endpoints until cancelled
pub async fn serve(addr: SocketAddr, ctx: RelayContext, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Relay server listening");
    axum::serve(
        listener,
        router(ctx).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}

fn reply(cmd: &str, field: Option<String>, value: Option<Value>) -> RelayMessage {
    RelayMessage {
        field,
        value,
        ..RelayMessage::new(cmd)
    }
}

fn rejected(remote: &SocketAddr) -> (StatusCode, Json<RelayMessage>) {
    warn!(%remote, "Relay request from address not allowed");
    (
        StatusCode::FORBIDDEN,
        Json(reply("error", None, Some(json!("address not allowed")))),
    )
}

async fn handle_post(
    State(ctx): State<RelayContext>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(msg): Json<RelayMessage>,
) -> (StatusCode, Json<RelayMessage>) {
    if !ctx.is_allowed(&remote.ip()) {
        return rejected(&remote);
    }
    let (status, body) = answer(&ctx, &remote, msg);
    (status, Json(body))
}

async fn upgrade_socket(
    State(ctx): State<RelayContext>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !ctx.is_allowed(&remote.ip()) {
        return rejected(&remote).into_response();
    }
    ws.on_upgrade(move |socket| relay_socket(socket, ctx, remote))
}

/// Answers every text frame on the socket until the peer goes away
async fn relay_socket(mut socket: WebSocket, ctx: RelayContext, remote: SocketAddr) {
    info!(%remote, "Relay peer connected");
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%remote, error = %e, "Relay socket failed");
                break;
            }
        };
        let (_, body) = match parse_frame(&text) {
            Ok(msg) => answer(&ctx, &remote, msg),
            Err(e) => {
                warn!(%remote, error = %e, "Unreadable relay message");
                (
                    StatusCode::BAD_REQUEST,
                    reply("error", None, Some(json!(format!("bad message: {e}")))),
                )
            }
        };
        let encoded = match serde_json::to_string(&body) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Cannot encode relay reply");
                continue;
            }
        };
        if socket.send(Message::Text(encoded)).await.is_err() {
            break;
        }
    }
    info!(%remote, "Relay peer disconnected");
}

/// `?` and `!` are shorthands for the data and rates commands
fn parse_frame(text: &str) -> serde_json::Result<RelayMessage> {
    match text.trim() {
        "?" => Ok(RelayMessage::new("data")),
        "!" => Ok(RelayMessage::new("rates")),
        other => serde_json::from_str(other),
    }
}

fn answer(ctx: &RelayContext, remote: &SocketAddr, msg: RelayMessage) -> (StatusCode, RelayMessage) {
    debug!(%remote, cmd = %msg.cmd, field = ?msg.field, "Relay request");

    match msg.cmd.as_str() {
        "ask" => {
            let field = msg.field.unwrap_or_default();
            let value = ctx.snapshots.borrow().lookup(&field);
            match value {
                Some(value) => (StatusCode::OK, reply("reply", Some(field), Some(value))),
                None => (
                    StatusCode::NOT_FOUND,
                    reply("error", Some(field), Some(json!("unknown field"))),
                ),
            }
        }
        "cum" | "usage" => (
            StatusCode::ACCEPTED,
            reply("ack", msg.field, Some(Value::from(msg.cmd.as_str()))),
        ),
        "data" => {
            let data = serde_json::to_value(&ctx.snapshots.borrow().state).ok();
            (StatusCode::OK, RelayMessage { data, ..RelayMessage::new("data") })
        }
        "rates" => {
            let data = serde_json::to_value(ctx.tariffs).ok();
            (StatusCode::OK, RelayMessage { data, ..RelayMessage::new("rates") })
        }
        other => {
            warn!(cmd = other, "Unknown relay command");
            (
                StatusCode::BAD_REQUEST,
                reply("error", msg.field, Some(json!(format!("unknown command {other}")))),
            )
        }
    }
}
