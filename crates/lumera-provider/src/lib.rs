//! Generation-provider adapters and the durable artifact migrator.
//!
//! A [`ProviderAdapter`] submits a generation or training request to an
//! external compute provider and answers a uniform status query. One
//! adapter instance exists per provider kind (image, video, training); all
//! of them normalize transient provider faults into retryable errors so
//! the reconciler can apply one retry policy across kinds.
//!
//! The [`ArtifactMigrator`] copies a provider-hosted (short-lived) output
//! URL into the platform's own object storage and returns the permanent
//! URL.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod http;
pub mod migrate;

pub use error::ProviderError;
pub use http::HttpProvider;
pub use migrate::{ArtifactMigrator, HttpMigrator, MigrateError};

use lumera_core::{AccountId, ProviderKind};
use serde::{Deserialize, Serialize};

/// What a request handler asks a provider to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// The owning account (forwarded for provider-side attribution only).
    pub account_id: AccountId,

    /// Provider class this request targets.
    pub kind: ProviderKind,

    /// Credits the caller validated and reserved for this job.
    pub cost: i64,

    /// Provider-specific request body (prompt, model, tuning params).
    pub payload: serde_json::Value,
}

/// Normalized provider-side status of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Still queued or running.
    Pending,

    /// Finished; the output lives at a provider-hosted URL.
    Succeeded {
        /// Short-lived provider URL of the generated artifact.
        output_url: String,
    },

    /// The provider gave up on the job.
    Failed {
        /// Provider-reported cause.
        detail: String,
    },
}

/// Capability interface over an external generation/training provider.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Submit a job; returns the provider-assigned reference id.
    ///
    /// # Errors
    ///
    /// - `ProviderError::Rejected` if the provider refused the request.
    /// - `ProviderError::Unavailable` / `ProviderError::Retryable` for
    ///   transient faults the reconciler may retry.
    async fn submit(&self, spec: &JobSpec) -> Result<String, ProviderError>;

    /// Query the status of a previously submitted job.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`ProviderAdapter::submit`]; a job the provider no
    /// longer knows is reported as `Rejected`.
    async fn query_status(&self, provider_ref: &str) -> Result<ProviderStatus, ProviderError>;
}
