//! Authentication and ticket error types.

use std::time::Duration;

/// Errors from primary (bearer token) authentication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The request lacks usable credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The bearer token is malformed, expired, revoked, or fails validation.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }
}

/// Errors from ticket issuance and consumption.
///
/// The variants are distinct so a client can tell "back off" from "retry".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// The subject exceeded the issuance rate limit.
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Time until the current rate-limit window closes.
        retry_after: Duration,
    },

    /// The ticket store could not be reached, or no store is configured.
    #[error("Ticket store unavailable: {message}")]
    Unavailable {
        /// Description of the store failure.
        message: String,
    },

    /// The ticket does not exist, was already consumed, or has expired.
    #[error("Invalid ticket")]
    InvalidTicket,
}

impl TicketError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Opaque handshake rejection.
///
/// Carries no cause: clients must not learn whether a ticket was
/// missing, invalid, expired, or already consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed")]
pub struct HandshakeRejected;
