//! HTTP responses for authentication and ticket errors.
//!
//! Bodies are `{"error": "..."}`. Rejected handshakes and invalid tickets
//! share one body so the response never reveals why a ticket failed.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{AuthError, HandshakeRejected, TicketError};

const AUTHENTICATION_FAILED: &str = "authentication failed";

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Unauthorized { message } | AuthError::InvalidToken { message } => message,
        };
        let mut response = error_body(StatusCode::UNAUTHORIZED, message);
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

impl IntoResponse for TicketError {
    fn into_response(self) -> Response {
        match self {
            TicketError::RateLimited { retry_after } => {
                // Rounded up to whole seconds.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = error_body(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
                response
            }
            TicketError::Unavailable { .. } => {
                error_body(StatusCode::SERVICE_UNAVAILABLE, "ticket service unavailable")
            }
            TicketError::InvalidTicket => {
                error_body(StatusCode::UNAUTHORIZED, AUTHENTICATION_FAILED)
            }
        }
    }
}

impl IntoResponse for HandshakeRejected {
    fn into_response(self) -> Response {
        error_body(StatusCode::UNAUTHORIZED, AUTHENTICATION_FAILED)
    }
}
