use axum::extract::ws::{Message, WebSocket};
use duet_common::protocol::ws::{encode_server_message, ServerMessage};

pub async fn send_ws_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let encoded = encode_server_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Text carried by a data frame. Binary payloads are read as UTF-8 with
/// invalid sequences replaced; control frames carry none.
pub fn frame_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_decode_lossily() {
        let text = frame_text(&Message::Binary(vec![b'h', b'i', 0xff].into()));
        assert_eq!(text.as_deref(), Some("hi\u{fffd}"));
    }

    #[test]
    fn control_frames_carry_no_text() {
        assert_eq!(frame_text(&Message::Ping(Vec::new().into())), None);
        assert_eq!(frame_text(&Message::Close(None)), None);
        assert_eq!(frame_text(&Message::Text("{}".into())).as_deref(), Some("{}"));
    }
}
