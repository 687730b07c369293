//! Reconciler error types.

use lumera_core::ProviderKind;
use lumera_provider::ProviderError;
use lumera_store::StoreError;

/// Errors surfaced to the caller of `reserve_and_submit`.
///
/// By the time one of these is returned the ledger is already consistent:
/// a rejected or unavailable submission has been refunded.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Balance too low; nothing was mutated.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// The provider refused the job. Reservation already refunded.
    #[error("provider rejected the job: {0}")]
    Rejected(String),

    /// The provider could not be reached. Reservation already refunded.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// No adapter is configured for this provider kind.
    #[error("no provider configured for kind: {}", .0.as_str())]
    UnknownKind(ProviderKind),

    /// Storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            other => Self::Store(other),
        }
    }
}

/// Errors from the reconciliation path (sweep or webhook).
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Provider failure that is not itself a job outcome.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
