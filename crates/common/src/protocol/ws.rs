// WebSocket message types for the duet chat protocol.
//
// Frames are JSON text, internally tagged by `type` with snake_case tags.
// Payload fields use camelCase to match the browser client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const WELCOME_TEXT: &str = "Connected to anonymous chat server";
pub const WAITING_TEXT: &str = "Looking for a partner...";
pub const MATCHED_TEXT: &str = "You are now connected with a stranger";
pub const PARTNER_DISCONNECTED_TEXT: &str = "Your partner has disconnected";
pub const DISCONNECTED_TEXT: &str = "You have been disconnected";
pub const TIMEOUT_TEXT: &str = "Search timed out. Please try again.";
pub const REPORT_RECEIVED_TEXT: &str =
    "Thank you for your report. We take these matters seriously.";

/// Sender name used when a chatting connection has no display name.
pub const FALLBACK_SENDER_NAME: &str = "Stranger";

/// Client -> Server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join the matching queue.
    FindPartner,

    /// Chat text for the current partner. Carried as a raw JSON value so
    /// non-string content is relayed untouched instead of rejected.
    Message {
        #[serde(default)]
        content: Value,
    },

    Typing {
        #[serde(default)]
        is_typing: bool,
    },

    /// Leave the queue or end the current chat.
    Disconnect,

    Report {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ClientMessage {
    /// Tags accepted from clients, in declaration order.
    pub const TAGS: [&'static str; 5] = ["find_partner", "message", "typing", "disconnect", "report"];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::FindPartner => "find_partner",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::Disconnect => "disconnect",
            Self::Report { .. } => "report",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Waiting,
    Disconnected,
    Timeout,
}

/// Server -> Client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        client_id: String,
        message: String,
    },

    Status {
        status: StatusKind,
        message: String,
    },

    Matched {
        partner_id: String,
        your_name: String,
        partner_name: String,
        message: String,
    },

    /// Relayed chat message from the partner.
    Message {
        content: Value,
        sender: String,
        timestamp: String,
    },

    Typing {
        is_typing: bool,
    },

    PartnerDisconnected {
        message: String,
    },

    Error {
        code: String,
        message: String,
    },

    ReportReceived {
        message: String,
    },
}

impl ServerMessage {
    pub fn status(status: StatusKind, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { code: code.into(), message: message.into() }
    }

    pub fn partner_disconnected() -> Self {
        Self::PartnerDisconnected { message: PARTNER_DISCONNECTED_TEXT.to_string() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type")]
    UnknownType(Option<String>),
}

/// Decode a raw inbound frame.
///
/// Frames that are not JSON, or that carry a known tag with ill-typed
/// fields, are `Malformed`. Any JSON whose `type` is absent or not one of
/// [`ClientMessage::TAGS`] is `UnknownType`.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| DecodeError::Malformed)?;

    let tag = value.get("type").and_then(Value::as_str);
    match tag {
        Some(tag) if ClientMessage::TAGS.contains(&tag) => {
            serde_json::from_value(value).map_err(|_| DecodeError::Malformed)
        }
        other => Err(DecodeError::UnknownType(other.map(ToOwned::to_owned))),
    }
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
