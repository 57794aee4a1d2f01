use super::protocol as ws_protocol;
use crate::chat::{CloseReason, ConnectionId, DispatcherHandle};
use crate::error::{ErrorCode, RelayError};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use duet_common::protocol::ws::ServerMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);
pub(crate) const MAX_FRAME_BYTES: usize = 64 * 1024;
/// Codec-level cap. Payloads between MAX_FRAME_BYTES and this are refused
/// with a size close frame by the read loop.
const CODEC_LIMIT_BYTES: usize = 4 * MAX_FRAME_BYTES;

pub async fn ws_upgrade(State(dispatcher): State<DispatcherHandle>, ws: WebSocketUpgrade) -> Response {
    if !dispatcher.is_running() {
        return RelayError::from_code(ErrorCode::ServiceUnavailable).into_response();
    }

    ws.max_frame_size(CODEC_LIMIT_BYTES)
        .max_message_size(CODEC_LIMIT_BYTES)
        .on_upgrade(move |socket| handle_socket(dispatcher, socket))
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket(dispatcher: DispatcherHandle, mut socket: WebSocket) {
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<ServerMessage>();
    let Some(connection_id) = dispatcher.connect(outbound_sender).await else {
        warn!("dispatcher unavailable, refusing websocket");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let reason = pump(&dispatcher, connection_id, &mut socket, outbound_receiver).await;
    debug!(connection_id = %connection_id, reason = reason.as_str(), "websocket closed");
    dispatcher.closed(connection_id, reason);
}

/// Shuttle frames between the socket and the dispatcher until either side
/// goes away, then report why.
async fn pump(
    dispatcher: &DispatcherHandle,
    connection_id: ConnectionId,
    socket: &mut WebSocket,
    mut outbound_receiver: mpsc::UnboundedReceiver<ServerMessage>,
) -> CloseReason {
    // Server pings every HEARTBEAT_INTERVAL. A client that has sent nothing,
    // pongs included, for a full interval plus HEARTBEAT_TIMEOUT is dropped.
    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_seen.elapsed() > HEARTBEAT_INTERVAL + HEARTBEAT_TIMEOUT {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    return CloseReason::HeartbeatTimeout;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return CloseReason::TransportFailure;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                let Some(outbound_message) = maybe_outbound else {
                    return CloseReason::TransportFailure;
                };
                if ws_protocol::send_ws_message(socket, &outbound_message).await.is_err() {
                    return CloseReason::TransportFailure;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    return CloseReason::ClientClosed;
                };
                last_seen = Instant::now();

                match message {
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return CloseReason::TransportFailure;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => return CloseReason::ClientClosed,
                    Ok(data) => {
                        let Some(raw) = ws_protocol::frame_text(&data) else {
                            continue;
                        };
                        if raw.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(socket).await;
                            return CloseReason::FrameTooLarge;
                        }
                        if !dispatcher.frame(connection_id, raw) {
                            return CloseReason::TransportFailure;
                        }
                    }
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(socket).await;
                            return CloseReason::FrameTooLarge;
                        }
                        debug!(connection_id = %connection_id, error = %error, "websocket read failed");
                        return CloseReason::TransportFailure;
                    }
                }
            }
        }
    }
}
