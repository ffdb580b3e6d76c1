//! WebSocket push sink for courier clients
//!
//! `GET /ws/courier` with courier identity headers. The server sends a
//! `subscribed` frame, then `order_created` / `order_updated` frames as they
//! happen. Nothing is expected from the client; the read half only tells us
//! when the socket is gone.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::auth::Caller;
use crate::error::OrderError;
use crate::services::dispatch::{CourierConnection, CourierEvent, WsCourierConnection};
use crate::AppState;

pub async fn courier_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    caller: Caller,
) -> Response {
    if !caller.is_courier() {
        return OrderError::Forbidden.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, caller))
}

async fn handle_socket(socket: WebSocket, state: AppState, caller: Caller) {
    let (sender, mut receiver) = socket.split();
    let mut connection = WsCourierConnection::new(sender);
    let id = state.dispatcher.next_connection_id();

    let subscribed = CourierEvent::Subscribed { connection_id: id.0 };
    let frame = match serde_json::to_string(&subscribed) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = %id, error = %e, "Failed to serialize subscribed frame");
            return;
        }
    };
    if let Err(e) = connection.send_text(frame).await {
        debug!(connection = %id, error = %e, "Courier left before subscription");
        return;
    }

    state
        .dispatcher
        .register_as(id, caller.role, Box::new(connection));
    info!(connection = %id, courier_id = %caller.user_id, "Courier connected");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "WebSocket closed by courier");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.dispatcher.deregister(id);
    info!(connection = %id, courier_id = %caller.user_id, "Courier disconnected");
}
