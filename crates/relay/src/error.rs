use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duet_common::protocol::ws::{DecodeError, ServerMessage};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidMessage,
    UnknownMessageType,
    AlreadyChatting,
    NotPaired,
    RateLimited,
    NotFound,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::AlreadyChatting => "ALREADY_CHATTING",
            Self::NotPaired => "NOT_PAIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidMessage | Self::UnknownMessageType => StatusCode::BAD_REQUEST,
            Self::AlreadyChatting | Self::NotPaired => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::ServiceUnavailable | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidMessage => "Invalid message format",
            Self::UnknownMessageType => "Unknown message type",
            Self::AlreadyChatting => "You are already in a chat",
            Self::NotPaired => "You are not connected to anyone",
            Self::RateLimited => "Rate limit exceeded. Please slow down.",
            Self::NotFound => "requested resource not found",
            Self::ServiceUnavailable => "chat service is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

/// Per-connection failures reported back to the sender as an `error` frame.
///
/// None of these change connection state or affect other connections.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type")]
    UnknownType,

    #[error("You are already in a chat")]
    AlreadyChatting,

    #[error("You are not connected to anyone")]
    NotPaired,

    #[error("Rate limit exceeded. Please slow down.")]
    RateLimited,
}

impl ChatError {
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::Malformed => ErrorCode::InvalidMessage,
            Self::UnknownType => ErrorCode::UnknownMessageType,
            Self::AlreadyChatting => ErrorCode::AlreadyChatting,
            Self::NotPaired => ErrorCode::NotPaired,
            Self::RateLimited => ErrorCode::RateLimited,
        }
    }

    pub fn to_message(self) -> ServerMessage {
        ServerMessage::error(self.code().as_str(), self.to_string())
    }
}

impl From<DecodeError> for ChatError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::Malformed => Self::Malformed,
            DecodeError::UnknownType(_) => Self::UnknownType,
        }
    }
}

/// HTTP error envelope for the auxiliary REST surface.
#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                }
            })),
        )
            .into_response()
    }
}
