//! Generation-job types and the job state machine.
//!
//! A job is one submitted unit of work to an external generation or
//! training provider. Jobs are created by the submission path and mutated
//! only by the reconciler afterwards; they are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, JobId, TransactionId};

/// Which provider class a job belongs to.
///
/// The kind selects the provider adapter at submission time and the
/// maximum lifetime the reconciler allows before forcing expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Image inference.
    Image,

    /// Video inference.
    Video,

    /// Model fine-tune training.
    Training,
}

impl ProviderKind {
    /// Stable string form used in API payloads, log fields, and object keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Training => "training",
        }
    }
}

/// Lifecycle state of a job.
///
/// `Created -> Submitted -> Polling -> Succeeded | Failed | Expired`.
/// Terminal states are immutable: once reached, every later observation is
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Credits reserved; provider submission not yet confirmed.
    Created,

    /// Provider accepted the job and returned a reference id.
    Submitted,

    /// The reconciler is checking status via poll or webhook.
    Polling,

    /// Output migrated to durable storage. Terminal.
    Succeeded,

    /// Provider failure, rejection, or migration gave up. Refunded. Terminal.
    Failed,

    /// No terminal status within the kind's lifetime. Refunded. Terminal.
    Expired,
}

impl JobState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Expired)
    }

    /// Stable string form used in API responses and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// One submitted generation/training request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (ULID, time-ordered).
    pub id: JobId,

    /// The owning account.
    pub account_id: AccountId,

    /// Credits reserved for this job.
    pub cost: i64,

    /// Provider class.
    pub kind: ProviderKind,

    /// Provider-assigned reference id; set once submission succeeds.
    pub provider_ref: Option<String>,

    /// Current lifecycle state.
    pub state: JobState,

    /// The spend transaction that reserved this job's cost.
    pub reservation_tx: TransactionId,

    /// The refund transaction, for jobs that ended `Failed` or `Expired`.
    pub outcome_tx: Option<TransactionId>,

    /// Provider-hosted (short-lived) output URL.
    pub ephemeral_output: Option<String>,

    /// Platform-owned permanent output URL.
    pub durable_output: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,

    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// The specific internal cause of a failure, kept for support.
    pub last_error: Option<String>,

    /// Migration attempts so far.
    pub retry_count: u32,
}

impl Job {
    /// Create a job in the `Created` state, linked to its reservation.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        cost: i64,
        kind: ProviderKind,
        reservation_tx: TransactionId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            account_id,
            cost,
            kind,
            provider_ref: None,
            state: JobState::Created,
            reservation_tx,
            outcome_tx: None,
            ephemeral_output: None,
            durable_output: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
            retry_count: 0,
        }
    }

    /// Age of the job relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
