//! Job lifecycle reconciler.
//!
//! The reconciler owns every job transition after creation and every
//! ledger consequence of a job outcome. Two inputs converge on one
//! transition function:
//!
//! - the **polling sweep**, a periodic pass over all non-terminal jobs
//!   that queries each job's provider adapter, and
//! - **webhook notifications** forwarded by the HTTP service.
//!
//! Both call [`Reconciler::observe`], which holds a per-job async lock,
//! checks terminal state first, and discards any observation for a job
//! that already finished. Terminal transitions are therefore
//! first-observation-wins and duplicates are no-ops.
//!
//! Ledger discipline: reservation happens strictly before provider
//! submission; refunds are grants keyed `refund:{job_id}` and so apply at
//! most once no matter how often a failure is observed; a crash between
//! the refund and the terminal job write is healed by the next sweep
//! re-observing the same outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;

pub use config::ReconcilerConfig;
pub use error::{ReconcileError, SubmitError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use lumera_core::{AccountId, Job, JobId, JobState, ProviderKind, TransactionKind};
use lumera_provider::{ArtifactMigrator, JobSpec, ProviderAdapter, ProviderError, ProviderStatus};
use lumera_store::Store;

/// Description used on every refund transaction for a failed job. The
/// specific internal cause stays in the job's `last_error`.
const REFUND_FAILED_DESCRIPTION: &str = "generation failed, credits refunded";

/// Description used on refunds for jobs we gave up waiting on.
const REFUND_EXPIRED_DESCRIPTION: &str = "generation timed out, credits refunded";

/// Advances jobs to terminal states and resolves the ledger accordingly.
pub struct Reconciler {
    store: Arc<dyn Store>,
    providers: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    migrator: Arc<dyn ArtifactMigrator>,
    config: ReconcilerConfig,
    // Serializes transitions per job; poll and webhook may race on the
    // same job id. Entries are created lazily and never removed.
    job_locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reconciler {
    /// Create a reconciler over the given store, provider adapters, and
    /// migrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        providers: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
        migrator: Arc<dyn ArtifactMigrator>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            providers,
            migrator,
            config,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    fn job_lock(&self, job_id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .job_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.entry(job_id).or_default().clone()
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Reserve credits and submit a job to the matching provider.
    ///
    /// Reservation strictly precedes submission: a crash between the two
    /// leaves a `Created` job that the sweep expires and refunds. If the
    /// provider rejects the job or cannot be reached, the reservation is
    /// refunded and the job persisted as `Failed` before this returns.
    ///
    /// Idempotent per `idempotency_key`: a retried call returns the job
    /// created by the original call without spending or submitting again.
    ///
    /// # Errors
    ///
    /// See [`SubmitError`]; whatever the error, the ledger is already
    /// consistent when it is returned.
    pub async fn reserve_and_submit(
        &self,
        account_id: AccountId,
        kind: ProviderKind,
        cost: i64,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<Job, SubmitError> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or(SubmitError::UnknownKind(kind))?
            .clone();

        let reservation = self.store.reserve(
            &account_id,
            cost,
            &format!("{} generation job", kind.as_str()),
            idempotency_key,
        )?;

        // A replayed reserve returns the original transaction; if a job was
        // already created for it, this request is a retry.
        if let Some(existing) = self.store.get_job_by_reservation(&reservation.id)? {
            tracing::info!(
                account_id = %account_id,
                job_id = %existing.id,
                idempotency_key = %idempotency_key,
                "submit replay, returning existing job"
            );
            return Ok(existing);
        }

        let mut job = Job::new(account_id, cost, kind, reservation.id);
        self.store.put_job(&job)?;

        tracing::info!(
            account_id = %account_id,
            job_id = %job.id,
            kind = %kind.as_str(),
            cost = cost,
            "credits reserved, submitting to provider"
        );

        let spec = JobSpec {
            account_id,
            kind,
            cost,
            payload,
        };

        match provider.submit(&spec).await {
            Ok(provider_ref) => {
                job.provider_ref = Some(provider_ref);
                job.state = JobState::Submitted;
                job.updated_at = Utc::now();
                self.store.update_job(&job)?;
                Ok(job)
            }
            Err(err) => {
                // Submission-time failures resolve the ledger before the
                // caller sees a response.
                tracing::warn!(
                    job_id = %job.id,
                    error = %err,
                    "provider submission failed, refunding"
                );
                self.finalize_refund(&mut job, JobState::Failed, &err.to_string())?;
                match err {
                    ProviderError::Rejected(msg) => Err(SubmitError::Rejected(msg)),
                    ProviderError::Unavailable(msg) => Err(SubmitError::Unavailable(msg)),
                    ProviderError::Retryable(msg) | ProviderError::InvalidResponse(msg) => {
                        Err(SubmitError::Unavailable(msg))
                    }
                }
            }
        }
    }

    // =========================================================================
    // Observation (the single transition function)
    // =========================================================================

    /// Apply one provider status observation to a job.
    ///
    /// Safe to invoke concurrently for the same job from the sweep and the
    /// webhook path; observations against a terminal job are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails; provider-reported failure is a
    /// job outcome, not an error.
    pub async fn observe(
        &self,
        job_id: JobId,
        status: ProviderStatus,
    ) -> Result<(), ReconcileError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let Some(mut job) = self.store.get_job(&job_id)? else {
            tracing::warn!(job_id = %job_id, "observation for unknown job discarded");
            return Ok(());
        };

        if job.state.is_terminal() {
            tracing::debug!(
                job_id = %job_id,
                state = %job.state.as_str(),
                "observation for terminal job discarded"
            );
            return Ok(());
        }

        match status {
            ProviderStatus::Pending => {
                if job.state == JobState::Submitted {
                    job.state = JobState::Polling;
                    job.updated_at = Utc::now();
                    self.store.update_job(&job)?;
                }
                Ok(())
            }
            ProviderStatus::Succeeded { output_url } => self.complete(&mut job, output_url).await,
            ProviderStatus::Failed { detail } => {
                self.finalize_refund(&mut job, JobState::Failed, &detail)?;
                Ok(())
            }
        }
    }

    /// Resolve an inbound provider notification to its job and apply it.
    ///
    /// Returns `false` for references this registry does not know; those
    /// are acknowledged upstream so the provider stops redelivering.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn handle_notification(
        &self,
        provider_ref: &str,
        status: ProviderStatus,
    ) -> Result<bool, ReconcileError> {
        let Some(job) = self.store.get_job_by_provider_ref(provider_ref)? else {
            tracing::warn!(provider_ref = %provider_ref, "notification for unknown provider reference");
            return Ok(false);
        };

        self.observe(job.id, status).await?;
        Ok(true)
    }

    /// Migrate the output and mark the job succeeded, or count a migration
    /// failure against the retry cap.
    async fn complete(&self, job: &mut Job, output_url: String) -> Result<(), ReconcileError> {
        job.ephemeral_output = Some(output_url.clone());

        // The object key is derived from the job id: re-running a
        // migration after a crash or duplicate success overwrites the same
        // object instead of duplicating it.
        let object_key = format!("{}/{}", job.kind.as_str(), job.id);

        match self.migrator.migrate(&output_url, &object_key).await {
            Ok(durable_url) => {
                job.state = JobState::Succeeded;
                job.durable_output = Some(durable_url);
                job.last_error = None;
                let now = Utc::now();
                job.updated_at = now;
                job.completed_at = Some(now);
                self.store.update_job(job)?;
                tracing::info!(
                    job_id = %job.id,
                    output = job.durable_output.as_deref().unwrap_or(""),
                    "job succeeded, output migrated"
                );
                Ok(())
            }
            Err(err) => {
                job.retry_count += 1;
                job.last_error = Some(err.to_string());
                if job.retry_count >= self.config.migrate_retry_cap {
                    // The provider succeeded but the output never survived
                    // into durable storage; the user is not charged for it.
                    tracing::warn!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        error = %err,
                        "migration retry cap reached, failing job"
                    );
                    self.finalize_refund(
                        job,
                        JobState::Failed,
                        &format!("output migration failed after {} attempts: {err}", job.retry_count),
                    )?;
                } else {
                    tracing::debug!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        error = %err,
                        "migration failed, will retry"
                    );
                    job.state = JobState::Polling;
                    job.updated_at = Utc::now();
                    self.store.update_job(job)?;
                }
                Ok(())
            }
        }
    }

    /// Refund the reservation and write the terminal job row.
    ///
    /// Refund first: the grant is idempotent by `refund:{job_id}`, so a
    /// crash before the job write is healed on the next observation.
    fn finalize_refund(
        &self,
        job: &mut Job,
        terminal: JobState,
        cause: &str,
    ) -> Result<(), lumera_store::StoreError> {
        debug_assert!(terminal.is_terminal());

        let description = if terminal == JobState::Expired {
            REFUND_EXPIRED_DESCRIPTION
        } else {
            REFUND_FAILED_DESCRIPTION
        };

        let refund = self.store.grant(
            &job.account_id,
            job.cost,
            TransactionKind::Refund,
            description,
            &format!("refund:{}", job.id),
        )?;

        job.state = terminal;
        job.outcome_tx = Some(refund.id);
        job.last_error = Some(cause.to_string());
        let now = Utc::now();
        job.updated_at = now;
        job.completed_at = Some(now);
        self.store.update_job(job)?;

        tracing::info!(
            job_id = %job.id,
            account_id = %job.account_id,
            state = %terminal.as_str(),
            refund_tx = %refund.id,
            cause = %cause,
            "job finalized with refund"
        );
        Ok(())
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// One pass over every non-terminal job: expire overdue jobs, poll the
    /// provider for the rest. Per-job faults are logged, not propagated.
    ///
    /// # Errors
    ///
    /// Returns an error only if the active-job listing itself fails.
    pub async fn sweep(&self) -> Result<(), ReconcileError> {
        let jobs = self.store.list_active_jobs()?;
        if jobs.is_empty() {
            return Ok(());
        }

        tracing::debug!(active_jobs = jobs.len(), "sweep started");

        futures::future::join_all(jobs.into_iter().map(|job| async move {
            let job_id = job.id;
            if let Err(err) = self.reconcile_job(job).await {
                tracing::error!(job_id = %job_id, error = %err, "sweep failed for job");
            }
        }))
        .await;

        Ok(())
    }

    async fn reconcile_job(&self, job: Job) -> Result<(), ReconcileError> {
        let lifetime = chrono::Duration::from_std(self.config.max_lifetime(job.kind))
            .unwrap_or_else(|_| chrono::Duration::max_value());

        if job.age(Utc::now()) > lifetime {
            return self.expire(job.id).await;
        }

        // `Created` means submission never confirmed; there is no provider
        // reference to poll, so the job waits for the expiry path above.
        let (JobState::Submitted | JobState::Polling) = job.state else {
            return Ok(());
        };
        let Some(provider_ref) = job.provider_ref.clone() else {
            return Ok(());
        };
        let Some(provider) = self.providers.get(&job.kind) else {
            tracing::error!(job_id = %job.id, kind = %job.kind.as_str(), "no provider for active job");
            return Ok(());
        };

        match provider.query_status(&provider_ref).await {
            Ok(status) => self.observe(job.id, status).await,
            Err(err) if err.is_retryable() => {
                // Bounded by the lifetime cap, not a separate counter.
                tracing::debug!(job_id = %job.id, error = %err, "transient poll error, retrying next sweep");
                Ok(())
            }
            Err(err) => {
                // The provider no longer recognizes the job; nothing will
                // ever finish it.
                self.observe(
                    job.id,
                    ProviderStatus::Failed {
                        detail: err.to_string(),
                    },
                )
                .await
            }
        }
    }

    /// Force a job past its lifetime into `Expired`, refunding the
    /// reservation.
    async fn expire(&self, job_id: JobId) -> Result<(), ReconcileError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let Some(mut job) = self.store.get_job(&job_id)? else {
            return Ok(());
        };
        if job.state.is_terminal() {
            return Ok(());
        }

        let cause = format!(
            "no terminal status within {}s",
            self.config.max_lifetime(job.kind).as_secs()
        );
        self.finalize_refund(&mut job, JobState::Expired, &cause)?;
        Ok(())
    }

    /// Run the periodic sweep until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "reconciler sweep task started"
        );

        loop {
            interval.tick().await;
            if let Err(err) = self.sweep().await {
                tracing::error!(error = %err, "sweep pass failed");
            }
        }
    }
}
