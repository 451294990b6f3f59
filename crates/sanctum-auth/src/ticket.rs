//! Single-use realtime handshake tickets.
//!
//! A client that already holds a bearer token exchanges it for a ticket, then
//! presents the ticket once as a query parameter on the realtime upgrade
//! request. Tickets are short-lived and consumed atomically, so a ticket that
//! leaks through a proxy log is worthless by the time anyone reads it.
//!
//! # Lifecycle
//!
//! ```text
//! issue ──→ Issued ──consume──→ Consumed   (record removed by take)
//!              └────TTL────→ Expired    (record removed by the store)
//! ```
//!
//! # Storage
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `ws_ticket:{id}` | JSON [`TicketRecord`] | ticket TTL |
//! | `ws_ticket_subject:{subject}` | id of the subject's latest ticket | ticket TTL |
//!
//! # Security Considerations
//!
//! - Ticket ids carry 256 bits from the OS random number generator
//! - Consumption is a single atomic get-and-delete; of concurrent callers
//!   presenting the same id, at most one succeeds
//! - Consumption fails closed: a store failure is never treated as success
//! - Consumption never retries, so a replay cannot be retried into success
//! - Only an 8-character id prefix is ever logged

use std::time::Duration;

use metrics::counter;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sanctum_cache::SharedStore;

use crate::config::AuthConfig;
use crate::error::TicketError;
use crate::rate_limit::{RateDecision, RateLimit, RateLimiter, RateSubject};

/// Rate limiter route for ticket issuance.
pub const ISSUE_ROUTE: &str = "ticket-issue";

const TICKET_ID_BYTES: usize = 32;
const TICKET_ID_LEN: usize = TICKET_ID_BYTES * 2;
const LOG_PREFIX_LEN: usize = 8;

/// Stored ticket state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// The authenticated principal the ticket was issued for.
    pub subject_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// A freshly issued ticket, returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTicket {
    pub id: String,
    pub expires_at: OffsetDateTime,
    pub ttl: Duration,
}

/// Issues and consumes handshake tickets.
///
/// The authority is the only writer of ticket records. It does not perform
/// primary authentication; callers pass a subject they have already
/// authenticated.
#[derive(Clone)]
pub struct TicketAuthority {
    store: SharedStore,
    limiter: RateLimiter,
    issue_limit: RateLimit,
    ttl: Duration,
    single_outstanding: bool,
}

impl TicketAuthority {
    pub fn new(store: SharedStore, limiter: RateLimiter, issue_limit: RateLimit, ttl: Duration) -> Self {
        Self {
            store,
            limiter,
            issue_limit,
            ttl,
            single_outstanding: true,
        }
    }

    /// Build an authority and its rate limiter from configuration.
    pub fn from_config(store: SharedStore, config: &AuthConfig) -> Self {
        let limiter = RateLimiter::new(store.clone()).with_enabled(config.rate_limit.enabled);
        Self::new(
            store,
            limiter,
            config.rate_limit.ticket_issue(),
            config.tickets.ttl,
        )
        .with_single_outstanding(config.tickets.single_outstanding)
    }

    /// Whether issuing a ticket revokes the subject's previous one.
    #[must_use]
    pub fn with_single_outstanding(mut self, enabled: bool) -> Self {
        self.single_outstanding = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a ticket for an already-authenticated subject.
    ///
    /// # Errors
    ///
    /// - [`TicketError::RateLimited`] if the subject exceeded the issuance limit
    /// - [`TicketError::Unavailable`] if the ticket could not be stored
    pub async fn issue(&self, subject_id: &str) -> Result<IssuedTicket, TicketError> {
        let subject = RateSubject::User(subject_id.to_string());
        match self.limiter.check(ISSUE_ROUTE, &subject, &self.issue_limit).await {
            RateDecision::Limited { retry_after } => {
                counter!("tickets_issued_total", "outcome" => "rate_limited").increment(1);
                return Err(TicketError::RateLimited { retry_after });
            }
            RateDecision::Unavailable => {
                counter!("tickets_issued_total", "outcome" => "unavailable").increment(1);
                return Err(TicketError::unavailable("rate limit store unavailable"));
            }
            RateDecision::Allowed { .. } | RateDecision::Degraded => {}
        }

        if !self.store.is_configured() {
            counter!("tickets_issued_total", "outcome" => "unavailable").increment(1);
            return Err(TicketError::unavailable("no ticket store configured"));
        }

        let id = generate_ticket_id();
        let issued_at = OffsetDateTime::now_utc();
        let record = TicketRecord {
            subject_id: subject_id.to_string(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        let payload = serde_json::to_vec(&record)
            .map_err(|e| TicketError::unavailable(format!("failed to encode ticket: {e}")))?;

        if let Err(e) = self.store.set(&ticket_key(&id), &payload, self.ttl).await {
            tracing::warn!(subject = %subject_id, error = %e, "Failed to store ticket");
            counter!("tickets_issued_total", "outcome" => "unavailable").increment(1);
            return Err(TicketError::unavailable(e.to_string()));
        }

        if self.single_outstanding {
            self.revoke_previous(subject_id, &id).await;
        }

        counter!("tickets_issued_total", "outcome" => "issued").increment(1);
        tracing::info!(
            subject = %subject_id,
            ticket = %log_prefix(&id),
            ttl_secs = self.ttl.as_secs(),
            "Issued realtime ticket"
        );

        Ok(IssuedTicket {
            id,
            expires_at: record.expires_at,
            ttl: self.ttl,
        })
    }

    /// Consume a ticket and return the subject it was issued for.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidTicket`] if the ticket is malformed, unknown,
    ///   already consumed, or expired
    /// - [`TicketError::Unavailable`] if the store cannot be consulted
    pub async fn consume(&self, ticket_id: &str) -> Result<String, TicketError> {
        let result = self.try_consume(ticket_id).await;
        let outcome = match &result {
            Ok(_) => "consumed",
            Err(TicketError::InvalidTicket) => "invalid",
            Err(_) => "unavailable",
        };
        counter!("tickets_consumed_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_consume(&self, ticket_id: &str) -> Result<String, TicketError> {
        if !is_well_formed(ticket_id) {
            tracing::debug!(length = ticket_id.len(), "Rejected malformed ticket");
            return Err(TicketError::InvalidTicket);
        }
        if !self.store.is_configured() {
            return Err(TicketError::unavailable("no ticket store configured"));
        }

        let raw = match self.store.take(&ticket_key(ticket_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(ticket = %log_prefix(ticket_id), "Ticket not found");
                return Err(TicketError::InvalidTicket);
            }
            Err(e) => {
                tracing::warn!(
                    ticket = %log_prefix(ticket_id),
                    error = %e,
                    "Ticket store unavailable, rejecting"
                );
                return Err(TicketError::unavailable(e.to_string()));
            }
        };

        let record: TicketRecord = serde_json::from_slice(&raw).map_err(|e| {
            tracing::warn!(ticket = %log_prefix(ticket_id), error = %e, "Undecodable ticket record");
            TicketError::InvalidTicket
        })?;

        if record.expires_at <= OffsetDateTime::now_utc() {
            tracing::debug!(ticket = %log_prefix(ticket_id), "Ticket expired");
            return Err(TicketError::InvalidTicket);
        }

        tracing::info!(
            subject = %record.subject_id,
            ticket = %log_prefix(ticket_id),
            "Consumed realtime ticket"
        );
        Ok(record.subject_id)
    }

    /// Point the subject at its new ticket and delete the one it replaces.
    ///
    /// Best effort: two concurrent issues for one subject can both survive.
    async fn revoke_previous(&self, subject_id: &str, new_id: &str) {
        let pointer = subject_key(subject_id);

        match self.store.get(&pointer).await {
            Ok(Some(previous)) => {
                if let Ok(previous) = String::from_utf8(previous) {
                    if previous != new_id && is_well_formed(&previous) {
                        match self.store.delete(&ticket_key(&previous)).await {
                            Ok(true) => tracing::debug!(
                                subject = %subject_id,
                                ticket = %log_prefix(&previous),
                                "Revoked previous ticket"
                            ),
                            Ok(false) => {}
                            Err(e) => tracing::warn!(
                                subject = %subject_id,
                                error = %e,
                                "Failed to revoke previous ticket"
                            ),
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "Failed to read ticket pointer");
            }
        }

        if let Err(e) = self.store.set(&pointer, new_id.as_bytes(), self.ttl).await {
            tracing::warn!(subject = %subject_id, error = %e, "Failed to record ticket pointer");
        }
    }
}

/// Generate a ticket id: 32 bytes from the OS RNG, hex encoded.
pub fn generate_ticket_id() -> String {
    let mut bytes = [0u8; TICKET_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `id` has the shape of an issued ticket id.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == TICKET_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn ticket_key(id: &str) -> String {
    format!("ws_ticket:{id}")
}

fn subject_key(subject_id: &str) -> String {
    format!("ws_ticket_subject:{subject_id}")
}

fn log_prefix(id: &str) -> &str {
    id.get(..LOG_PREFIX_LEN).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::UnavailableStore;
    use sanctum_cache::{KvStore, MemoryStore, NoopStore};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const TTL: Duration = Duration::from_secs(30);

    /// Start of a 60s rate-limit window.
    fn window_start() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(60 * 28_333_333)
    }

    fn authority(store: SharedStore) -> TicketAuthority {
        let limiter = RateLimiter::new(store.clone());
        TicketAuthority::new(store, limiter, RateLimit::new(100, Duration::from_secs(60)), TTL)
    }

    #[test]
    fn test_generated_ids_are_well_formed_and_unique() {
        let ids: HashSet<String> = (0..100).map(|_| generate_ticket_id()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| is_well_formed(id)));
    }

    #[test]
    fn test_is_well_formed() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("abc"));
        assert!(!is_well_formed(&"g".repeat(64)));
        assert!(!is_well_formed(&"a".repeat(65)));
        assert!(is_well_formed(&"aF09".repeat(16)));
    }

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let authority = authority(Arc::new(MemoryStore::new()));

        let ticket = authority.issue("42").await.unwrap();
        assert_eq!(ticket.ttl, TTL);

        assert_eq!(authority.consume(&ticket.id).await.unwrap(), "42");
        assert_eq!(
            authority.consume(&ticket.id).await,
            Err(TicketError::InvalidTicket)
        );
    }

    #[tokio::test]
    async fn test_stored_record_spans_ttl() {
        let store = Arc::new(MemoryStore::new());
        let authority = authority(store.clone());

        let ticket = authority.issue("42").await.unwrap();
        let raw = store.get(&ticket_key(&ticket.id)).await.unwrap().unwrap();
        let record: TicketRecord = serde_json::from_slice(&raw).unwrap();

        assert_eq!(record.subject_id, "42");
        assert_eq!(record.expires_at - record.issued_at, TTL);
        assert_eq!(record.expires_at, ticket.expires_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_ticket_is_invalid() {
        let authority = authority(Arc::new(MemoryStore::new()));

        let ticket = authority.issue("42").await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(
            authority.consume(&ticket.id).await,
            Err(TicketError::InvalidTicket)
        );
    }

    #[tokio::test]
    async fn test_record_past_expiry_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let authority = authority(store.clone());

        let id = generate_ticket_id();
        let issued_at = OffsetDateTime::now_utc() - Duration::from_secs(60);
        let record = TicketRecord {
            subject_id: "42".to_string(),
            issued_at,
            expires_at: issued_at + TTL,
        };
        store
            .set(
                &ticket_key(&id),
                &serde_json::to_vec(&record).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(authority.consume(&id).await, Err(TicketError::InvalidTicket));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_have_one_winner() {
        let authority = authority(Arc::new(MemoryStore::new()));
        let ticket = authority.issue("42").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let authority = authority.clone();
            let id = ticket.id.clone();
            handles.push(tokio::spawn(async move { authority.consume(&id).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(subject) => {
                    assert_eq!(subject, "42");
                    winners += 1;
                }
                Err(e) => assert_eq!(e, TicketError::InvalidTicket),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_malformed_ids_never_reach_store() {
        // Any store call here would report Unavailable.
        let authority = authority(Arc::new(UnavailableStore));

        for id in ["", "short", &"z".repeat(64), &"a".repeat(1024)] {
            assert_eq!(authority.consume(id).await, Err(TicketError::InvalidTicket));
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_closed() {
        let authority = authority(Arc::new(UnavailableStore));

        let consumed = authority.consume(&generate_ticket_id()).await;
        assert!(matches!(consumed, Err(TicketError::Unavailable { .. })));

        let issued = authority.issue("42").await;
        assert!(matches!(issued, Err(TicketError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_absent_store_fails_closed() {
        let authority = authority(Arc::new(NoopStore));

        assert!(matches!(
            authority.issue("42").await,
            Err(TicketError::Unavailable { .. })
        ));
        assert!(matches!(
            authority.consume(&generate_ticket_id()).await,
            Err(TicketError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_issue_is_rate_limited() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone()).with_clock(window_start);
        let authority =
            TicketAuthority::new(store, limiter, RateLimit::new(2, Duration::from_secs(60)), TTL);

        authority.issue("7").await.unwrap();
        authority.issue("7").await.unwrap();

        match authority.issue("7").await {
            Err(TicketError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        // Other subjects are unaffected.
        authority.issue("8").await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_closed_issue_policy() {
        let store: SharedStore = Arc::new(UnavailableStore);
        let limiter = RateLimiter::new(store.clone());
        let limit = RateLimit::new(5, Duration::from_secs(60)).fail_closed();
        let authority = TicketAuthority::new(store, limiter, limit, TTL);

        assert_eq!(
            authority.issue("42").await,
            Err(TicketError::unavailable("rate limit store unavailable"))
        );
    }

    #[tokio::test]
    async fn test_reissue_revokes_previous_ticket() {
        let authority = authority(Arc::new(MemoryStore::new()));

        let first = authority.issue("42").await.unwrap();
        let second = authority.issue("42").await.unwrap();
        assert_ne!(first.id, second.id);

        assert_eq!(
            authority.consume(&first.id).await,
            Err(TicketError::InvalidTicket)
        );
        assert_eq!(authority.consume(&second.id).await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_reissue_keeps_previous_when_disabled() {
        let authority = authority(Arc::new(MemoryStore::new())).with_single_outstanding(false);

        let first = authority.issue("42").await.unwrap();
        let second = authority.issue("42").await.unwrap();

        assert_eq!(authority.consume(&first.id).await.unwrap(), "42");
        assert_eq!(authority.consume(&second.id).await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_reissue_does_not_touch_other_subjects() {
        let authority = authority(Arc::new(MemoryStore::new()));

        let alice = authority.issue("1").await.unwrap();
        authority.issue("2").await.unwrap();

        assert_eq!(authority.consume(&alice.id).await.unwrap(), "1");
    }
}
