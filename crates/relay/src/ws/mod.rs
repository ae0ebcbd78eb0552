// WebSocket transport: upgrade, keepalive and framing. All relay decisions
// are made by the hub; this layer only moves frames.

mod handler;
pub mod protocol;

pub use handler::SocketState;

use axum::{routing::get, Router};

use crate::config::SocketLimits;
use crate::hub::RelayHub;

pub fn router(hub: RelayHub, limits: SocketLimits) -> Router {
    Router::new()
        .route("/", get(handler::ws_upgrade))
        .route("/ws", get(handler::ws_upgrade))
        .with_state(SocketState { hub, limits })
}

#[cfg(test)]
mod tests {
    use super::router;
    use crate::config::SocketLimits;
    use crate::hub::{ConnectionHandler, RelayHub};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{protocol::frame::coding::CloseCode, Message as WsFrame},
        MaybeTlsStream, WebSocketStream,
    };

    type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_relay(limits: SocketLimits) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should expose local address");
        let (hub, _hub_task) = RelayHub::spawn(ConnectionHandler::default());
        let app = router(hub, limits);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("relay server should run");
        });
        format!("ws://{addr}")
    }

    async fn connect(url: &str) -> ClientSocket {
        let (socket, _) = connect_async(url).await.expect("websocket should connect");
        socket
    }

    /// Next text frame, skipping control frames.
    async fn next_text(socket: &mut ClientSocket) -> String {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for websocket frame");
            match next.expect("websocket should remain open").expect("frame should decode") {
                WsFrame::Text(payload) => return payload.as_str().to_owned(),
                WsFrame::Close(frame) => panic!("websocket closed unexpectedly: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Drain until the server ends the connection; returns the close code if
    /// one was sent.
    async fn wait_for_close(socket: &mut ClientSocket) -> Option<CloseCode> {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for the server to close");
            match next {
                Some(Ok(WsFrame::Close(frame))) => return frame.map(|frame| frame.code),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }

    #[tokio::test]
    async fn ping_text_is_answered_with_pong() {
        let url = spawn_relay(SocketLimits::default()).await;
        let mut socket = connect(&url).await;

        socket.send(WsFrame::Text("ping".into())).await.expect("ping should send");
        assert_eq!(next_text(&mut socket).await, "pong");
    }

    #[tokio::test]
    async fn both_upgrade_paths_are_served() {
        let url = spawn_relay(SocketLimits::default()).await;
        let mut socket = connect(&format!("{url}/ws")).await;

        socket.send(WsFrame::Text("ping".into())).await.expect("ping should send");
        assert_eq!(next_text(&mut socket).await, "pong");
    }

    #[tokio::test]
    async fn undecodable_frame_gets_error_and_socket_stays_open() {
        let url = spawn_relay(SocketLimits::default()).await;
        let mut socket = connect(&url).await;

        socket.send(WsFrame::Text("{not json".into())).await.expect("frame should send");
        let reply: serde_json::Value =
            serde_json::from_str(&next_text(&mut socket).await).expect("reply should be json");
        assert_eq!(reply["action"], "error");
        assert_eq!(reply["code"], "INVALID_MESSAGE");

        socket.send(WsFrame::Text("ping".into())).await.expect("ping should send");
        assert_eq!(next_text(&mut socket).await, "pong");
    }

    #[tokio::test]
    async fn binary_json_frames_are_accepted() {
        let url = spawn_relay(SocketLimits::default()).await;
        let mut socket = connect(&format!("{url}/?session_id=A&device_id=r1&role=remote")).await;

        let reply: serde_json::Value =
            serde_json::from_str(&next_text(&mut socket).await).expect("reply should be json");
        assert_eq!(reply["action"], "no_player_connected");

        socket
            .send(WsFrame::Binary(b"{\"action\":\"next\"}".to_vec().into()))
            .await
            .expect("binary frame should send");
        let relayed: serde_json::Value =
            serde_json::from_str(&next_text(&mut socket).await).expect("relay should be json");
        assert_eq!(relayed["action"], "next");
        assert_eq!(relayed["sender_device_id"], "r1");
    }

    #[tokio::test]
    async fn oversized_frame_closes_the_socket() {
        let limits = SocketLimits { max_frame_bytes: 1024, ..SocketLimits::default() };
        let url = spawn_relay(limits).await;
        let mut socket = connect(&url).await;

        let oversized = format!("{{\"action\":\"blob\",\"payload\":\"{}\"}}", "a".repeat(2048));
        let _ = socket.send(WsFrame::Text(oversized.into())).await;

        if let Some(code) = wait_for_close(&mut socket).await {
            assert_eq!(code, CloseCode::Size);
        }
    }

    #[tokio::test]
    async fn silent_client_is_dropped_after_heartbeat_timeout() {
        let limits = SocketLimits {
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(50),
            ..SocketLimits::default()
        };
        let url = spawn_relay(limits).await;
        let mut socket = connect(&url).await;

        // Not polling the stream means the client never answers the ping.
        tokio::time::sleep(Duration::from_millis(400)).await;
        wait_for_close(&mut socket).await;
    }

    #[tokio::test]
    async fn responsive_client_survives_several_heartbeats() {
        let limits = SocketLimits {
            heartbeat_interval: Duration::from_millis(40),
            heartbeat_timeout: Duration::from_millis(500),
            ..SocketLimits::default()
        };
        let url = spawn_relay(limits).await;
        let mut socket = connect(&url).await;

        // Reading lets the client answer each server ping.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while tokio::time::Instant::now() < deadline {
            match timeout(Duration::from_millis(50), socket.next()).await {
                Ok(Some(Ok(WsFrame::Close(frame)))) => panic!("closed during heartbeat: {frame:?}"),
                Ok(Some(Err(error))) => panic!("socket failed during heartbeat: {error}"),
                Ok(None) => panic!("socket ended during heartbeat"),
                _ => {}
            }
        }

        socket.send(WsFrame::Text("ping".into())).await.expect("ping should send");
        assert_eq!(next_text(&mut socket).await, "pong");
    }
}
