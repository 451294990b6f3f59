//! Primary (bearer token) authentication.
//!
//! Ticket issuance requires a subject that has already been authenticated
//! through the primary credential path. [`PrimaryAuthenticator`] is that
//! seam; [`JwtAuthenticator`] is the HS256 implementation the server uses.
//!
//! Tokens are read from the `Authorization: Bearer` header only. Query
//! string tokens are never accepted, so long-lived credentials stay out of
//! proxy and access logs.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use sanctum_cache::SharedStore;

use crate::config::JwtConfig;
use crate::error::AuthError;

/// Resolves request credentials to an authenticated subject id.
#[async_trait]
pub trait PrimaryAuthenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    jti: Option<String>,
}

/// Validates HS256 bearer tokens.
///
/// Checks signature, expiry, issuer, and audience. When built
/// [`with_revocations`](Self::with_revocations), a token whose `jti` is listed
/// at `blacklist:{jti}` is rejected.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    revocations: Option<SharedStore>,
}

impl JwtAuthenticator {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            revocations: None,
        }
    }

    /// Check token ids against the revocation list in `store`.
    #[must_use]
    pub fn with_revocations(mut self, store: SharedStore) -> Self {
        self.revocations = Some(store);
        self
    }

    /// Lookup failures count as not revoked.
    async fn is_revoked(&self, jti: &str) -> bool {
        let Some(store) = self.revocations.as_ref().filter(|s| s.is_configured()) else {
            return false;
        };

        match store.get(&format!("blacklist:{jti}")).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Revocation check failed, accepting token");
                false
            }
        }
    }
}

#[async_trait]
impl PrimaryAuthenticator for JwtAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = bearer_token(headers)?;

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Failed to decode token");
                AuthError::invalid_token(e.to_string())
            })?
            .claims;

        if claims.sub.is_empty() {
            return Err(AuthError::invalid_token("empty subject"));
        }

        if let Some(jti) = claims.jti.as_deref().filter(|j| !j.is_empty()) {
            if self.is_revoked(jti).await {
                tracing::debug!(subject = %claims.sub, "Token revoked");
                return Err(AuthError::invalid_token("token has been revoked"));
            }
        }

        Ok(claims.sub)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::unauthorized("Malformed Authorization header"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::unauthorized("Expected a Bearer token"))
}
