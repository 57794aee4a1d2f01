mod handler;
mod protocol;

use crate::chat::DispatcherHandle;
use axum::{routing::get, Router};

/// Chat websocket endpoints. Both paths speak the same protocol.
pub fn router(dispatcher: DispatcherHandle) -> Router {
    Router::new()
        .route("/", get(handler::ws_upgrade))
        .route("/ws", get(handler::ws_upgrade))
        .with_state(dispatcher)
}
