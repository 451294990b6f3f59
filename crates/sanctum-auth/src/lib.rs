//! Rate limiting, single-use realtime tickets and bearer authentication.
//!
//! ## Architecture
//!
//! - **Primary authentication** ([`primary`]): bearer token to subject id
//! - **Rate limiter** ([`rate_limit`]): fixed-window counters in the shared store
//! - **Ticket authority** ([`ticket`]): issues and atomically consumes
//!   single-use handshake tickets
//! - **Handshake verifier** ([`handshake`]): gate for realtime upgrades
//!
//! ## Realtime Connection Flow
//!
//! ```text
//! POST /api/ws/ticket  (Authorization: Bearer <jwt>)
//!   → PrimaryAuthenticator::authenticate → subject
//!   → TicketAuthority::issue(subject)    → rate limit, store ws_ticket:{id}
//!   ← {"ticket": id}
//!
//! GET /api/ws?ticket=<id>
//!   → HandshakeVerifier::verify → TicketAuthority::consume (atomic take)
//!   → upgrade as subject, or 401 "authentication failed"
//! ```
//!
//! ## Failure Policy
//!
//! | Component | Store unavailable |
//! |-----------|-------------------|
//! | Rate limiter | per route: allow (open) or reject (closed) |
//! | Ticket issue | `Unavailable` |
//! | Ticket consume | `Unavailable`, never success |
//! | Revocation check | token accepted |

pub mod config;
pub mod error;
pub mod handshake;
pub mod primary;
pub mod rate_limit;
pub mod response;
pub mod ticket;

#[cfg(test)]
mod testing;

pub use config::{AuthConfig, ConfigError, JwtConfig, RateLimitConfig, TicketConfig};
pub use error::{AuthError, HandshakeRejected, TicketError};
pub use handshake::HandshakeVerifier;
pub use primary::{JwtAuthenticator, PrimaryAuthenticator};
pub use rate_limit::{FailPolicy, RateDecision, RateLimit, RateLimiter, RateSubject};
pub use ticket::{IssuedTicket, TicketAuthority, TicketRecord};
