//! Realtime connection handshake verification.

use crate::error::{HandshakeRejected, TicketError};
use crate::ticket::TicketAuthority;

/// Gate for realtime connection upgrades.
///
/// Every failure collapses into one [`HandshakeRejected`]; the cause is only
/// logged, so a client cannot tell a missing ticket from an expired,
/// replayed, or unverifiable one.
#[derive(Clone)]
pub struct HandshakeVerifier {
    tickets: TicketAuthority,
}

impl HandshakeVerifier {
    pub fn new(tickets: TicketAuthority) -> Self {
        Self { tickets }
    }

    /// Verify the ticket presented on an upgrade request and return the
    /// subject the connection is authenticated as.
    pub async fn verify(&self, ticket: Option<&str>) -> Result<String, HandshakeRejected> {
        let Some(ticket) = ticket.filter(|t| !t.is_empty()) else {
            tracing::debug!("Handshake rejected: no ticket presented");
            return Err(HandshakeRejected);
        };

        match self.tickets.consume(ticket).await {
            Ok(subject) => Ok(subject),
            Err(TicketError::Unavailable { message }) => {
                tracing::warn!(error = %message, "Handshake rejected: ticket store unavailable");
                Err(HandshakeRejected)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Handshake rejected");
                Err(HandshakeRejected)
            }
        }
    }
}
