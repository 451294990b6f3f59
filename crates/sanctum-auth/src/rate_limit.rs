//! Fixed-window rate limiter backed by the shared store.
//!
//! Each (route, subject) pair gets one counter per window, keyed
//! `rl:{route}:{subject}:{window_index}` where the window index is
//! `floor(unix_ms / window_ms)`. A new window starts a new key, so counters
//! never need a read-modify-write reset. The store sets the counter's TTL when
//! the counter is created, so stale buckets expire on their own.
//!
//! A fixed window admits up to twice the limit across a window boundary.
//!
//! # Store Failures
//!
//! What happens when the store cannot be reached depends on the route's
//! [`FailPolicy`]: `Open` lets the request through, `Closed` rejects it.

use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::counter;
use serde::{Deserialize, Serialize};

use sanctum_cache::SharedStore;

/// Who a rate limit is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateSubject {
    /// An authenticated subject.
    User(String),
    /// An anonymous client, by address.
    Ip(IpAddr),
}

impl fmt::Display for RateSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Ip(addr) => write!(f, "ip:{addr}"),
        }
    }
}

/// Outcome when the store cannot be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Allow the request.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

/// A limit of `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub window: Duration,
    pub policy: FailPolicy,
}

impl RateLimit {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            policy: FailPolicy::Open,
        }
    }

    #[must_use]
    pub fn fail_closed(mut self) -> Self {
        self.policy = FailPolicy::Closed;
        self
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within the limit.
    Allowed { count: u64, remaining: u64 },
    /// Store unavailable, allowed by a fail-open policy.
    Degraded,
    /// Over the limit until the current window closes.
    Limited { retry_after: Duration },
    /// Store unavailable, rejected by a fail-closed policy.
    Unavailable,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. } | Self::Degraded)
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Allowed { .. } => "allowed",
            Self::Degraded => "degraded",
            Self::Limited { .. } => "limited",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Per-route, per-subject request counter.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    enabled: bool,
    clock: fn() -> SystemTime,
}

impl RateLimiter {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            enabled: true,
            clock: SystemTime::now,
        }
    }

    /// Read window boundaries from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> SystemTime) -> Self {
        self.clock = clock;
        self
    }

    /// Turn enforcement on or off. A disabled limiter never touches the store.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one request and report whether it is within `limit` per `window`.
    ///
    /// Fails open: returns `true` when the store is unavailable.
    pub async fn allow(
        &self,
        route: &str,
        subject: &RateSubject,
        limit: u64,
        window: Duration,
    ) -> bool {
        self.check(route, subject, &RateLimit::new(limit, window))
            .await
            .is_allowed()
    }

    pub async fn check(&self, route: &str, subject: &RateSubject, limit: &RateLimit) -> RateDecision {
        self.check_at(route, subject, limit, (self.clock)()).await
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub async fn check_at(
        &self,
        route: &str,
        subject: &RateSubject,
        limit: &RateLimit,
        now: SystemTime,
    ) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed {
                count: 0,
                remaining: limit.limit,
            };
        }

        let window_ms = u64::try_from(limit.window.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let now_ms = u64::try_from(
            now.duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX);
        let key = bucket_key(route, subject, now_ms / window_ms);

        let decision = if !self.store.is_configured() {
            on_store_failure(limit.policy)
        } else {
            match self.store.incr_with_expiry(&key, limit.window).await {
                Ok(count) if count <= limit.limit => RateDecision::Allowed {
                    count,
                    remaining: limit.limit - count,
                },
                Ok(count) => {
                    let retry_after = Duration::from_millis(window_ms - now_ms % window_ms);
                    tracing::debug!(
                        route,
                        subject = %subject,
                        count,
                        limit = limit.limit,
                        "Rate limit exceeded"
                    );
                    RateDecision::Limited { retry_after }
                }
                Err(e) => {
                    tracing::warn!(
                        route,
                        error = %e,
                        policy = ?limit.policy,
                        "Rate limit store unavailable"
                    );
                    on_store_failure(limit.policy)
                }
            }
        };

        counter!(
            "rate_limit_decisions_total",
            "route" => route.to_string(),
            "outcome" => decision.outcome()
        )
        .increment(1);
        decision
    }
}

fn bucket_key(route: &str, subject: &RateSubject, window_index: u64) -> String {
    format!("rl:{route}:{subject}:{window_index}")
}

fn on_store_failure(policy: FailPolicy) -> RateDecision {
    match policy {
        FailPolicy::Open => RateDecision::Degraded,
        FailPolicy::Closed => RateDecision::Unavailable,
    }
}
