//! Authentication, ticket and rate-limit configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::rate_limit::{FailPolicy, RateLimit};

/// Upper bound on ticket lifetime. Tickets are meant to live for seconds.
pub const MAX_TICKET_TTL: Duration = Duration::from_secs(5 * 60);

/// Secrets shorter than this are accepted with a warning.
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Root authentication configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth.jwt]
/// secret = "change-me-to-at-least-32-bytes-of-entropy"
///
/// [auth.tickets]
/// ttl = "30s"
///
/// [auth.rate_limit]
/// ticket_issue_limit = 10
/// ticket_issue_window = "1m"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token validation.
    pub jwt: JwtConfig,

    /// Realtime handshake tickets.
    pub tickets: TicketConfig,

    /// Rate limiting.
    pub rate_limit: RateLimitConfig,
}

/// HS256 bearer token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Shared HMAC secret. Required.
    pub secret: String,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` claim.
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "sanctum-api".to_string(),
            audience: "sanctum-client".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Lifetime of an unconsumed ticket.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Revoke a subject's outstanding ticket when a new one is issued.
    pub single_outstanding: bool,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            single_outstanding: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// When false every check passes without touching the store
    /// (local development, load tests).
    pub enabled: bool,

    /// Tickets a subject may request per window.
    pub ticket_issue_limit: u64,

    #[serde(with = "humantime_serde")]
    pub ticket_issue_window: Duration,

    /// Outcome for ticket issuance when the store cannot be reached.
    pub ticket_issue_policy: FailPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ticket_issue_limit: 10,
            ticket_issue_window: Duration::from_secs(60),
            ticket_issue_policy: FailPolicy::Open,
        }
    }
}

impl RateLimitConfig {
    /// Limit applied to `POST /api/ws/ticket`.
    pub fn ticket_issue(&self) -> RateLimit {
        RateLimit {
            limit: self.ticket_issue_limit,
            window: self.ticket_issue_window,
            policy: self.ticket_issue_policy,
        }
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The JWT secret is empty
    /// - The ticket TTL is zero or above [`MAX_TICKET_TTL`]
    /// - Rate limiting is enabled with a zero limit or window
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Missing("auth.jwt.secret".to_string()));
        }
        if self.jwt.secret.len() < RECOMMENDED_SECRET_LEN {
            tracing::warn!(
                length = self.jwt.secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "auth.jwt.secret is shorter than recommended"
            );
        }

        if self.tickets.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "auth.tickets.ttl must be > 0".to_string(),
            ));
        }
        if self.tickets.ttl > MAX_TICKET_TTL {
            return Err(ConfigError::InvalidValue(format!(
                "auth.tickets.ttl must be at most {}s, got {}s",
                MAX_TICKET_TTL.as_secs(),
                self.tickets.ttl.as_secs()
            )));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.ticket_issue_limit == 0 {
                return Err(ConfigError::InvalidValue(
                    "auth.rate_limit.ticket_issue_limit must be > 0".to_string(),
                ));
            }
            if self.rate_limit.ticket_issue_window < Duration::from_millis(1) {
                return Err(ConfigError::InvalidValue(
                    "auth.rate_limit.ticket_issue_window must be at least 1ms".to_string(),
                ));
            }
        }

        Ok(())
    }
}
