//! Provider error taxonomy.

/// Errors from a provider adapter.
///
/// The split that matters downstream is retryable vs. terminal: the
/// reconciler retries `Unavailable`/`Retryable` on its next sweep and
/// treats `Rejected` as a terminal submission failure (refund).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached at all.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request. Terminal.
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Transient provider fault (rate limit, 5xx, timeout).
    #[error("transient provider error: {0}")]
    Retryable(String),

    /// The provider answered with something we could not parse.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the reconciler should retry this error on a later sweep.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Retryable(_))
    }
}
