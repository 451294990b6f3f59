//! Realtime connection endpoints.
//!
//! - `POST /api/ws/ticket`: exchange a bearer token for a single-use ticket
//! - `GET /api/ws?ticket=...`: upgrade to a WebSocket authenticated by ticket
//!
//! The upgrade endpoint never accepts a bearer token in the query string; the
//! ticket is the only credential it reads.

use axum::{
    Json,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::metrics::{record_handshake, session_closed, session_opened};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    pub ticket: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket: String,
    /// Seconds until the ticket expires.
    pub expires_in: u64,
}

/// Issue a realtime ticket to the bearer of a valid token.
pub async fn issue_ticket(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let subject = match state.authenticator.authenticate(&headers).await {
        Ok(subject) => subject,
        Err(e) => {
            tracing::debug!(error = %e, "Ticket request rejected");
            return e.into_response();
        }
    };

    match state.tickets.issue(&subject).await {
        Ok(ticket) => {
            let mut response = Json(TicketResponse {
                ticket: ticket.id,
                expires_in: ticket.ttl.as_secs(),
            })
            .into_response();
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => {
            tracing::info!(subject = %subject, error = %e, "Ticket issuance failed");
            e.into_response()
        }
    }
}

/// Verify the presented ticket, then upgrade.
///
/// The ticket is checked before the upgrade headers, so every request without
/// a valid ticket gets the same 401.
pub async fn realtime_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let subject = match state.verifier.verify(params.ticket.as_deref()).await {
        Ok(subject) => subject,
        Err(rejected) => {
            record_handshake("rejected");
            return rejected.into_response();
        }
    };

    match ws {
        Ok(ws) => {
            record_handshake("accepted");
            ws.on_upgrade(move |socket| run_session(socket, subject))
        }
        Err(rejection) => {
            tracing::debug!(subject = %subject, error = %rejection, "Ticket presented without upgrade");
            record_handshake("not_upgrade");
            rejection.into_response()
        }
    }
}

/// Drive one authenticated session until the client closes it.
pub async fn run_session(socket: WebSocket, subject: String) {
    let (mut ws_write, mut ws_read) = socket.split();

    session_opened();
    tracing::info!(subject = %subject, "Realtime session connected");

    let hello = json!({ "type": "connected", "subject": subject }).to_string();
    if let Err(e) = ws_write.send(Message::Text(hello.into())).await {
        tracing::debug!(subject = %subject, error = %e, "Realtime write error");
    } else {
        while let Some(msg) = ws_read.next().await {
            let reply = match msg {
                Ok(Message::Text(text)) => reply_to(&subject, text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(subject = %subject, error = %e, "Realtime read error");
                    break;
                }
            };

            if let Some(reply) = reply
                && let Err(e) = ws_write.send(Message::Text(reply.to_string().into())).await
            {
                tracing::debug!(subject = %subject, error = %e, "Realtime write error");
                break;
            }
        }
    }

    session_closed();
    tracing::info!(subject = %subject, "Realtime session disconnected");
}

fn reply_to(subject: &str, text: &str) -> Option<Value> {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        tracing::debug!(subject = %subject, "Ignoring malformed realtime message");
        return None;
    };

    match message.get("type").and_then(Value::as_str) {
        Some("ping") => Some(json!({ "type": "pong" })),
        Some(other) => Some(json!({
            "type": "error",
            "message": format!("unsupported message type: {other}"),
        })),
        None => None,
    }
}
