use super::protocol as ws_protocol;
use crate::config::SocketLimits;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::hub::RelayHub;
use crate::metrics;
use crate::session::{ConnectionId, Outbound};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use cuelink_common::protocol::ws::{RegisterRequest, ServerFrame};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SocketState {
    pub hub: RelayHub,
    pub limits: SocketLimits,
}

pub async fn ws_upgrade(
    State(state): State<SocketState>,
    Query(identity): Query<RegisterRequest>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    let max_frame_bytes = state.limits.max_frame_bytes;
    ws.max_frame_size(max_frame_bytes).max_message_size(max_frame_bytes).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, identity, socket)).await;
        },
    )
}

fn frame_size_exceeded_reason(max_frame_bytes: usize) -> String {
    format!("websocket frame exceeds maximum size of {max_frame_bytes} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
        || message.contains("space limit")
}

async fn close_frame_too_large(socket: &mut WebSocket, max_frame_bytes: usize) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason(max_frame_bytes).into(),
        })))
        .await;
}

async fn handle_socket(state: SocketState, identity: RegisterRequest, mut socket: WebSocket) {
    let SocketState { hub, limits } = state;
    let connection_id = Uuid::new_v4();
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let (outbound, mut outbound_frames) = Outbound::channel();
    if !hub.connect(connection_id, outbound, identity) {
        warn!(connection_id = %connection_id, request_id = %request_id, "relay hub unavailable");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    metrics::increment_connections_accepted();
    info!(connection_id = %connection_id, request_id = %request_id, "websocket connected");

    // Ping every interval; a ping left unanswered for the timeout drops the link.
    let mut heartbeat_interval = tokio::time::interval(limits.heartbeat_interval);
    heartbeat_interval.reset();
    let mut awaiting_pong_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                match awaiting_pong_since {
                    Some(sent_at) if sent_at.elapsed() >= limits.heartbeat_timeout => {
                        warn!(
                            connection_id = %connection_id,
                            request_id = %request_id,
                            "heartbeat timeout, disconnecting"
                        );
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Some(_) => {}
                    None => {
                        if socket.send(Message::Ping(vec![].into())).await.is_err() {
                            break;
                        }
                        awaiting_pong_since = Some(Instant::now());
                    }
                }
            }
            maybe_outbound = outbound_frames.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if ws_protocol::send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // The relay dropped this link (replaced by a newer connection).
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > limits.max_frame_bytes {
                            close_frame_too_large(&mut socket, limits.max_frame_bytes).await;
                            break;
                        }
                        if handle_text(&hub, connection_id, &mut socket, raw_message.as_str())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Binary(payload)) => {
                        if payload.len() > limits.max_frame_bytes {
                            close_frame_too_large(&mut socket, limits.max_frame_bytes).await;
                            break;
                        }
                        let handled = match std::str::from_utf8(&payload) {
                            Ok(raw_message) => {
                                handle_text(&hub, connection_id, &mut socket, raw_message).await
                            }
                            Err(_) => reject_frame(&mut socket, connection_id).await,
                        };
                        if handled.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong_since = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) if is_frame_size_violation(&error) => {
                        close_frame_too_large(&mut socket, limits.max_frame_bytes).await;
                        break;
                    }
                    Err(error) => {
                        debug!(connection_id = %connection_id, error = %error, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(connection_id);
    info!(connection_id = %connection_id, request_id = %request_id, "websocket disconnected");
}

/// Answer keepalives locally and hand everything else to the hub.
async fn handle_text(
    hub: &RelayHub,
    connection_id: ConnectionId,
    socket: &mut WebSocket,
    raw_message: &str,
) -> Result<(), ()> {
    if ws_protocol::is_keepalive(raw_message) {
        return ws_protocol::send_pong(socket).await;
    }

    match ws_protocol::decode_message(raw_message) {
        Ok(message) => {
            if hub.message(connection_id, message) {
                Ok(())
            } else {
                Err(())
            }
        }
        Err(_) => reject_frame(socket, connection_id).await,
    }
}

async fn reject_frame(socket: &mut WebSocket, connection_id: ConnectionId) -> Result<(), ()> {
    metrics::increment_frames_rejected();
    debug!(connection_id = %connection_id, "undecodable frame rejected");
    let notice = RelayError::from_code(ErrorCode::InvalidMessage).to_notice();
    ws_protocol::send_frame(socket, &ServerFrame::from(notice)).await
}
