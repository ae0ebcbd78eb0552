use axum::extract::ws::{Message, WebSocket};
use cuelink_common::protocol::ws::{ClientMessage, ServerFrame, PING_FRAME, PONG_FRAME};

pub fn is_keepalive(raw: &str) -> bool {
    raw.trim() == PING_FRAME
}

pub fn decode_message(raw: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str::<ClientMessage>(raw)
}

pub fn encode_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

pub async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ()> {
    let encoded = encode_frame(frame).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub async fn send_pong(socket: &mut WebSocket) -> Result<(), ()> {
    socket.send(Message::Text(PONG_FRAME.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuelink_common::protocol::ws::ServerNotice;

    #[test]
    fn keepalive_is_recognised_before_json() {
        assert!(is_keepalive("ping"));
        assert!(is_keepalive("ping\n"));
        assert!(!is_keepalive("\"ping\""));
        assert!(!is_keepalive("{\"action\":\"ping\"}"));
    }

    #[test]
    fn decode_rejects_non_objects_and_missing_action() {
        assert!(decode_message("not json").is_err());
        assert!(decode_message("[1,2,3]").is_err());
        assert!(decode_message("{\"payload\":1}").is_err());
        assert!(decode_message("{\"action\":7}").is_err());
    }

    #[test]
    fn decode_keeps_extra_fields() {
        let message = decode_message("{\"action\":\"goto\",\"payload\":[1],\"slide\":\"intro\"}")
            .expect("frame should decode");
        assert_eq!(message.action, "goto");
        assert_eq!(message.fields.get("slide").and_then(|v| v.as_str()), Some("intro"));
    }

    #[test]
    fn encode_notice_frame() {
        let encoded = encode_frame(&ServerFrame::from(ServerNotice::PlayerPromoted))
            .expect("notice should encode");
        assert_eq!(encoded, "{\"action\":\"player_promoted\"}");
    }
}
