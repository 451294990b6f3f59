//! Store adapter error types.

/// Errors that can occur during a key-value store round-trip.
///
/// A missing key is not an error; it is reported as `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached, refused the command, or timed out.
    ///
    /// Always a soft failure: caches skip, the rate limiter applies its fail
    /// policy, ticket consumption fails closed.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
