//! End-to-end lifecycle tests over a real store and scripted
//! provider/migrator doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use lumera_core::{AccountId, JobState, ProviderKind, TransactionKind};
use lumera_provider::{
    ArtifactMigrator, JobSpec, MigrateError, ProviderAdapter, ProviderError, ProviderStatus,
};
use lumera_reconciler::{Reconciler, ReconcilerConfig, SubmitError};
use lumera_store::{RocksStore, Store};

// ============================================================================
// Scripted doubles
// ============================================================================

/// What the scripted provider does on the next submit call.
#[derive(Clone)]
enum SubmitScript {
    Accept(String),
    Reject(String),
    Unavailable(String),
}

/// What the scripted provider reports for a reference.
#[derive(Clone)]
enum StatusScript {
    Pending,
    Succeeded(String),
    Failed(String),
    Transient(String),
}

#[derive(Clone)]
struct ScriptedProvider {
    submit: Arc<Mutex<SubmitScript>>,
    statuses: Arc<Mutex<HashMap<String, StatusScript>>>,
    submit_calls: Arc<AtomicU32>,
}

impl ScriptedProvider {
    fn accepting(provider_ref: &str) -> Self {
        Self {
            submit: Arc::new(Mutex::new(SubmitScript::Accept(provider_ref.into()))),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            submit_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn set_submit(&self, script: SubmitScript) {
        *self.submit.lock().unwrap() = script;
    }

    fn set_status(&self, provider_ref: &str, script: StatusScript) {
        self.statuses
            .lock()
            .unwrap()
            .insert(provider_ref.into(), script);
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedProvider {
    async fn submit(&self, _spec: &JobSpec) -> Result<String, ProviderError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match self.submit.lock().unwrap().clone() {
            SubmitScript::Accept(provider_ref) => Ok(provider_ref),
            SubmitScript::Reject(msg) => Err(ProviderError::Rejected(msg)),
            SubmitScript::Unavailable(msg) => Err(ProviderError::Unavailable(msg)),
        }
    }

    async fn query_status(&self, provider_ref: &str) -> Result<ProviderStatus, ProviderError> {
        match self.statuses.lock().unwrap().get(provider_ref).cloned() {
            None | Some(StatusScript::Pending) => Ok(ProviderStatus::Pending),
            Some(StatusScript::Succeeded(url)) => Ok(ProviderStatus::Succeeded { output_url: url }),
            Some(StatusScript::Failed(detail)) => Ok(ProviderStatus::Failed { detail }),
            Some(StatusScript::Transient(msg)) => Err(ProviderError::Retryable(msg)),
        }
    }
}

#[derive(Clone)]
struct ScriptedMigrator {
    fail_next: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl ScriptedMigrator {
    fn ok() -> Self {
        Self {
            fail_next: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn fail_next(&self, times: u32) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ArtifactMigrator for ScriptedMigrator {
    async fn migrate(
        &self,
        _ephemeral_url: &str,
        object_key: &str,
    ) -> Result<String, MigrateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(MigrateError::FetchFailed("ephemeral URL expired".into()));
        }
        Ok(format!("https://cdn.lumera.app/{object_key}"))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: Arc<RocksStore>,
    provider: ScriptedProvider,
    migrator: ScriptedMigrator,
    reconciler: Reconciler,
    _dir: TempDir,
}

fn harness_with_config(config: ReconcilerConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let provider = ScriptedProvider::accepting("prov-1");
    let migrator = ScriptedMigrator::ok();

    let mut providers: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();
    providers.insert(ProviderKind::Image, Arc::new(provider.clone()));
    providers.insert(ProviderKind::Video, Arc::new(provider.clone()));
    providers.insert(ProviderKind::Training, Arc::new(provider.clone()));

    let reconciler = Reconciler::new(
        store.clone() as Arc<dyn Store>,
        providers,
        Arc::new(migrator.clone()),
        config,
    );

    Harness {
        store,
        provider,
        migrator,
        reconciler,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with_config(ReconcilerConfig {
        migrate_retry_cap: 3,
        ..ReconcilerConfig::default()
    })
}

impl Harness {
    fn funded_account(&self, amount: i64) -> AccountId {
        let account_id = AccountId::generate();
        self.store
            .grant(
                &account_id,
                amount,
                TransactionKind::WelcomeGrant,
                "welcome",
                &format!("welcome:{account_id}"),
            )
            .unwrap();
        account_id
    }

    fn refund_count(&self, account_id: &AccountId) -> usize {
        self.store
            .list_transactions_by_account(account_id, 100, 0)
            .unwrap()
            .iter()
            .filter(|t| t.kind == TransactionKind::Refund)
            .count()
    }
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn submit_reserves_then_confirms() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();

    assert_eq!(job.state, JobState::Submitted);
    assert_eq!(job.provider_ref.as_deref(), Some("prov-1"));
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
}

#[tokio::test]
async fn submit_insufficient_balance_mutates_nothing() {
    let h = harness();
    let account_id = h.funded_account(3);

    let err = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::InsufficientBalance {
            balance: 3,
            required: 4
        }
    ));
    assert_eq!(h.store.balance(&account_id).unwrap(), 3);
    assert_eq!(h.provider.submit_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.list_active_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn submit_rejection_refunds_before_returning() {
    let h = harness();
    let account_id = h.funded_account(10);
    h.provider
        .set_submit(SubmitScript::Reject("bad prompt".into()));

    let err = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SubmitError::Rejected(_)));
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
    assert_eq!(h.refund_count(&account_id), 1);

    let jobs = h.store.list_jobs_by_account(&account_id, 10, 0).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Failed);
    assert!(jobs[0].outcome_tx.is_some());
    assert!(h.store.list_active_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn submit_provider_outage_refunds() {
    let h = harness();
    let account_id = h.funded_account(10);
    h.provider
        .set_submit(SubmitScript::Unavailable("connection refused".into()));

    let err = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Video, 6, json!({}), "req-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SubmitError::Unavailable(_)));
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
}

#[tokio::test]
async fn submit_retry_with_same_key_is_idempotent() {
    let h = harness();
    let account_id = h.funded_account(10);

    let first = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    let second = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
    assert_eq!(h.provider.submit_calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Success path
// ============================================================================

#[tokio::test]
async fn sweep_success_migrates_and_keeps_spend() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    h.provider.set_status(
        "prov-1",
        StatusScript::Succeeded("https://ephemeral/out.png".into()),
    );

    h.reconciler.sweep().await.unwrap();

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert_eq!(
        stored.durable_output.as_deref(),
        Some(format!("https://cdn.lumera.app/image/{}", job.id).as_str())
    );
    assert!(stored.completed_at.is_some());
    assert!(stored.outcome_tx.is_none());
    // No refund: the spend stands.
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
    assert_eq!(h.refund_count(&account_id), 0);
    assert!(h.store.list_active_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn pending_then_success_over_two_sweeps() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();

    // First sweep sees the job still running.
    h.reconciler.sweep().await.unwrap();
    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Polling);

    h.provider.set_status(
        "prov-1",
        StatusScript::Succeeded("https://ephemeral/out.png".into()),
    );
    h.reconciler.sweep().await.unwrap();

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
}

#[tokio::test]
async fn duplicate_success_observations_migrate_once() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();

    let status = ProviderStatus::Succeeded {
        output_url: "https://ephemeral/out.png".into(),
    };
    // Webhook and a late poll deliver the same terminal status.
    h.reconciler
        .handle_notification("prov-1", status.clone())
        .await
        .unwrap();
    h.reconciler.observe(job.id, status).await.unwrap();
    h.reconciler.sweep().await.unwrap();

    assert_eq!(h.migrator.calls(), 1);
    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
}

// ============================================================================
// Failure and refunds
// ============================================================================

#[tokio::test]
async fn provider_failure_refunds_once() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);

    let failure = ProviderStatus::Failed {
        detail: "NSFW content detected".into(),
    };
    h.reconciler
        .handle_notification("prov-1", failure.clone())
        .await
        .unwrap();
    // Duplicate delivery.
    h.reconciler
        .handle_notification("prov-1", failure)
        .await
        .unwrap();

    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
    assert_eq!(h.refund_count(&account_id), 1);

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("NSFW content detected"));
    assert!(stored.outcome_tx.is_some());
}

#[tokio::test]
async fn terminal_jobs_ignore_later_observations() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    h.reconciler
        .observe(
            job.id,
            ProviderStatus::Failed {
                detail: "worker crashed".into(),
            },
        )
        .await
        .unwrap();

    // A late success must not resurrect the job or migrate anything.
    h.reconciler
        .observe(
            job.id,
            ProviderStatus::Succeeded {
                output_url: "https://ephemeral/out.png".into(),
            },
        )
        .await
        .unwrap();

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert!(stored.durable_output.is_none());
    assert_eq!(h.migrator.calls(), 0);
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
}

#[tokio::test]
async fn migration_failure_retries_then_succeeds() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    h.provider.set_status(
        "prov-1",
        StatusScript::Succeeded("https://ephemeral/out.png".into()),
    );
    h.migrator.fail_next(1);

    h.reconciler.sweep().await.unwrap();
    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Polling);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_error.is_some());

    h.reconciler.sweep().await.unwrap();
    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
}

#[tokio::test]
async fn migration_retry_cap_forces_failure_and_refund() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    h.provider.set_status(
        "prov-1",
        StatusScript::Succeeded("https://ephemeral/out.png".into()),
    );
    h.migrator.fail_next(10);

    // Cap is 3 in this harness.
    for _ in 0..3 {
        h.reconciler.sweep().await.unwrap();
    }

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.retry_count, 3);
    // Provider succeeded, but the user is not charged for output that did
    // not survive into durable storage.
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
    assert_eq!(h.refund_count(&account_id), 1);
}

#[tokio::test]
async fn transient_poll_errors_leave_job_untouched() {
    let h = harness();
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();
    h.provider
        .set_status("prov-1", StatusScript::Transient("rate limited".into()));

    h.reconciler.sweep().await.unwrap();

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Submitted);
    assert_eq!(h.store.balance(&account_id).unwrap(), 6);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn overdue_jobs_expire_with_refund() {
    let h = harness_with_config(ReconcilerConfig {
        image_max_lifetime: Duration::ZERO,
        ..ReconcilerConfig::default()
    });
    let account_id = h.funded_account(10);

    let job = h
        .reconciler
        .reserve_and_submit(account_id, ProviderKind::Image, 4, json!({}), "req-1")
        .await
        .unwrap();

    h.reconciler.sweep().await.unwrap();

    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Expired);
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
    assert_eq!(h.refund_count(&account_id), 1);

    // A late success after expiry is discarded.
    h.reconciler
        .observe(
            job.id,
            ProviderStatus::Succeeded {
                output_url: "https://ephemeral/out.png".into(),
            },
        )
        .await
        .unwrap();
    let stored = h.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Expired);
    assert_eq!(h.store.balance(&account_id).unwrap(), 10);
}

#[tokio::test]
async fn unknown_notification_reference_is_acknowledged() {
    let h = harness();

    let known = h
        .reconciler
        .handle_notification(
            "never-submitted",
            ProviderStatus::Failed {
                detail: "whatever".into(),
            },
        )
        .await
        .unwrap();

    assert!(!known);
}
