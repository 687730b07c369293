//! `RocksDB` implementation of the [`Store`] trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use lumera_core::{
    Account, AccountId, CreditTransaction, Job, JobId, TransactionId, TransactionKind,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    // Serializes reserve/grant per account. Entries are created lazily and
    // never removed; the map stays small (one entry per active account).
    account_locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl RocksStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: Mutex::new(HashMap::new()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// The lock guarding an account's read-modify-write cycle.
    fn account_lock(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.entry(*account_id).or_default().clone()
    }

    /// Look up a previously committed transaction for this idempotency key.
    fn recorded_transaction(
        &self,
        account_id: &AccountId,
        idempotency_key: &str,
    ) -> Result<Option<CreditTransaction>> {
        let cf_keys = self.cf(cf::LEDGER_KEYS)?;
        let key = keys::ledger_idempotency_key(account_id, idempotency_key);

        let Some(value) = self
            .db
            .get_cf(&cf_keys, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if value.len() != 16 {
            return Err(StoreError::Database(
                "malformed ledger idempotency entry".into(),
            ));
        }
        bytes.copy_from_slice(&value);
        let tx_id = TransactionId::from_bytes(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tx = self
            .get_transaction(&tx_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: tx_id.to_string(),
            })?;
        Ok(Some(tx))
    }

    /// Commit an account mutation and its transaction in one batch.
    fn commit_ledger_entry(
        &self,
        account: &Account,
        transaction: &CreditTransaction,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_keys = self.cf(cf::LEDGER_KEYS)?;

        let account_value = Self::serialize(account)?;
        let tx_value = Self::serialize(transaction)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, keys::account_key(&account.id), &account_value);
        batch.put_cf(&cf_tx, keys::transaction_key(&transaction.id), &tx_value);
        batch.put_cf(
            &cf_tx_by_account,
            keys::account_transaction_key(&account.id, &transaction.id),
            [],
        );
        batch.put_cf(
            &cf_keys,
            keys::ledger_idempotency_key(&account.id, &transaction.idempotency_key),
            transaction.id.to_bytes(),
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Accounts
    // =========================================================================

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;

        self.db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn balance(&self, account_id: &AccountId) -> Result<i64> {
        let account = self
            .get_account(account_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;
        Ok(account.balance)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    fn reserve(
        &self,
        account_id: &AccountId,
        amount: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<CreditTransaction> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(tx) = self.recorded_transaction(account_id, idempotency_key)? {
            tracing::debug!(
                account_id = %account_id,
                idempotency_key = %idempotency_key,
                transaction_id = %tx.id,
                "reserve replay, returning recorded transaction"
            );
            return Ok(tx);
        }

        let mut account = self
            .get_account(account_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;

        if account.balance < amount {
            return Err(StoreError::InsufficientBalance {
                balance: account.balance,
                required: amount,
            });
        }

        account.balance -= amount;
        account.version += 1;
        account.lifetime_spent += amount;
        account.updated_at = chrono::Utc::now();

        let transaction = CreditTransaction::spend(
            *account_id,
            amount,
            account.balance,
            reason.to_string(),
            idempotency_key.to_string(),
        );

        self.commit_ledger_entry(&account, &transaction)?;
        Ok(transaction)
    }

    fn grant(
        &self,
        account_id: &AccountId,
        amount: i64,
        kind: TransactionKind,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<CreditTransaction> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(tx) = self.recorded_transaction(account_id, idempotency_key)? {
            tracing::debug!(
                account_id = %account_id,
                idempotency_key = %idempotency_key,
                transaction_id = %tx.id,
                "grant replay, returning recorded transaction"
            );
            return Ok(tx);
        }

        // Accounts come into existence on their first grant.
        let mut account = self
            .get_account(account_id)?
            .unwrap_or_else(|| Account::new(*account_id));

        account.balance += amount;
        account.version += 1;
        account.lifetime_granted += amount;
        account.updated_at = chrono::Utc::now();

        let transaction = CreditTransaction::grant(
            *account_id,
            amount,
            kind,
            account.balance,
            reason.to_string(),
            idempotency_key.to_string(),
        );

        self.commit_ledger_entry(&account, &transaction)?;
        Ok(transaction)
    }

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;

        self.db
            .get_cf(&cf, keys::transaction_key(transaction_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // ULID suffixes make the range time-ordered; collect and reverse
        // for newest-first listing.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = TransactionId::from_bytes(keys::suffix_id_bytes(&key))
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Job registry
    // =========================================================================

    fn put_job(&self, job: &Job) -> Result<()> {
        let cf_jobs = self.cf(cf::JOBS)?;
        let cf_by_account = self.cf(cf::JOBS_BY_ACCOUNT)?;
        let cf_by_reservation = self.cf(cf::JOBS_BY_RESERVATION)?;
        let cf_active = self.cf(cf::ACTIVE_JOBS)?;

        let job_key = keys::job_key(&job.id);
        let value = Self::serialize(job)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_jobs, &job_key, &value);
        batch.put_cf(
            &cf_by_account,
            keys::account_job_key(&job.account_id, &job.id),
            [],
        );
        batch.put_cf(
            &cf_by_reservation,
            job.reservation_tx.to_bytes(),
            job.id.to_bytes(),
        );
        if !job.state.is_terminal() {
            batch.put_cf(&cf_active, &job_key, []);
        }
        if let Some(provider_ref) = &job.provider_ref {
            let cf_by_ref = self.cf(cf::JOBS_BY_PROVIDER_REF)?;
            batch.put_cf(&cf_by_ref, provider_ref.as_bytes(), job.id.to_bytes());
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        let cf_jobs = self.cf(cf::JOBS)?;
        let cf_active = self.cf(cf::ACTIVE_JOBS)?;

        let job_key = keys::job_key(&job.id);
        let value = Self::serialize(job)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_jobs, &job_key, &value);
        if let Some(provider_ref) = &job.provider_ref {
            let cf_by_ref = self.cf(cf::JOBS_BY_PROVIDER_REF)?;
            batch.put_cf(&cf_by_ref, provider_ref.as_bytes(), job.id.to_bytes());
        }
        if job.state.is_terminal() {
            batch.delete_cf(&cf_active, &job_key);
        } else {
            batch.put_cf(&cf_active, &job_key, []);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let cf = self.cf(cf::JOBS)?;

        self.db
            .get_cf(&cf, keys::job_key(job_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_job_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Job>> {
        let cf = self.cf(cf::JOBS_BY_PROVIDER_REF)?;

        let Some(value) = self
            .db
            .get_cf(&cf, provider_ref.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if value.len() != 16 {
            return Err(StoreError::Database("malformed provider-ref entry".into()));
        }
        bytes.copy_from_slice(&value);
        let job_id =
            JobId::from_bytes(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.get_job(&job_id)
    }

    fn get_job_by_reservation(&self, reservation_tx: &TransactionId) -> Result<Option<Job>> {
        let cf = self.cf(cf::JOBS_BY_RESERVATION)?;

        let Some(value) = self
            .db
            .get_cf(&cf, reservation_tx.to_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if value.len() != 16 {
            return Err(StoreError::Database("malformed reservation entry".into()));
        }
        bytes.copy_from_slice(&value);
        let job_id =
            JobId::from_bytes(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.get_job(&job_id)
    }

    fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let cf_active = self.cf(cf::ACTIVE_JOBS)?;

        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(&cf_active, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            let mut bytes = [0u8; 16];
            if key.len() != 16 {
                continue;
            }
            bytes.copy_from_slice(&key);
            let job_id =
                JobId::from_bytes(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;

            if let Some(job) = self.get_job(&job_id)? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }

    fn list_jobs_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let cf_by_account = self.cf(cf::JOBS_BY_ACCOUNT)?;
        let prefix = keys::account_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut jobs = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if jobs.len() >= limit {
                break;
            }
            let job_id = JobId::from_bytes(keys::suffix_id_bytes(&key))
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if let Some(job) = self.get_job(&job_id)? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumera_core::{JobState, ProviderKind};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn funded_account(store: &RocksStore, amount: i64) -> AccountId {
        let account_id = AccountId::generate();
        store
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

    #[test]
    fn grant_creates_account() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 100);

        let account = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.version, 1);
        assert_eq!(account.lifetime_granted, 100);
        assert_eq!(store.balance(&account_id).unwrap(), 100);
    }

    #[test]
    fn reserve_decrements_and_records() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 10);

        let tx = store.reserve(&account_id, 4, "image job", "req-1").unwrap();
        assert_eq!(tx.amount, -4);
        assert_eq!(tx.balance_after, 6);
        assert_eq!(store.balance(&account_id).unwrap(), 6);

        let account = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(account.lifetime_spent, 4);
        assert_eq!(account.version, 2);
    }

    #[test]
    fn reserve_insufficient_leaves_no_trace() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 3);

        let result = store.reserve(&account_id, 4, "image job", "req-1");
        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance {
                balance: 3,
                required: 4
            })
        ));

        assert_eq!(store.balance(&account_id).unwrap(), 3);
        // Only the welcome grant exists.
        let txs = store
            .list_transactions_by_account(&account_id, 10, 0)
            .unwrap();
        assert_eq!(txs.len(), 1);
    }

    #[test]
    fn reserve_on_unknown_account_fails() {
        let (store, _dir) = create_test_store();
        let result = store.reserve(&AccountId::generate(), 4, "image job", "req-1");
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn reserve_is_idempotent() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 10);

        let first = store.reserve(&account_id, 4, "image job", "req-1").unwrap();
        let second = store.reserve(&account_id, 4, "image job", "req-1").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.balance(&account_id).unwrap(), 6);
    }

    #[test]
    fn refund_grant_is_idempotent() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 10);
        store.reserve(&account_id, 4, "image job", "req-1").unwrap();

        let first = store
            .grant(
                &account_id,
                4,
                TransactionKind::Refund,
                "generation failed, credits refunded",
                "refund:job-1",
            )
            .unwrap();
        let second = store
            .grant(
                &account_id,
                4,
                TransactionKind::Refund,
                "generation failed, credits refunded",
                "refund:job-1",
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.balance(&account_id).unwrap(), 10);
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 10);

        assert!(matches!(
            store.reserve(&account_id, 0, "noop", "req-0"),
            Err(StoreError::InvalidAmount(0))
        ));
        assert!(matches!(
            store.grant(&account_id, -5, TransactionKind::Bonus, "bad", "b-1"),
            Err(StoreError::InvalidAmount(-5))
        ));
    }

    #[test]
    fn balance_equals_sum_of_transactions() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 50);

        store.reserve(&account_id, 12, "video job", "req-1").unwrap();
        store.reserve(&account_id, 7, "image job", "req-2").unwrap();
        store
            .grant(
                &account_id,
                12,
                TransactionKind::Refund,
                "refund",
                "refund:job-a",
            )
            .unwrap();
        store
            .grant(&account_id, 20, TransactionKind::Purchase, "topup", "pay-1")
            .unwrap();

        let txs = store
            .list_transactions_by_account(&account_id, 100, 0)
            .unwrap();
        let sum: i64 = txs.iter().map(|t| t.amount).sum();
        assert_eq!(sum, store.balance(&account_id).unwrap());
        assert_eq!(sum, 63);
    }

    #[test]
    fn concurrent_reserves_cannot_double_spend() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        // Balance covers exactly one job.
        let account_id = funded_account(&store, 4);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.reserve(&account_id, 4, "image job", &format!("req-{i}"))
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let failures = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::InsufficientBalance { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(failures, 7);
        assert_eq!(store.balance(&account_id).unwrap(), 0);
    }

    #[test]
    fn transaction_listing_newest_first_with_pagination() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 100);

        std::thread::sleep(std::time::Duration::from_millis(2));
        store.reserve(&account_id, 1, "first", "req-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.reserve(&account_id, 2, "second", "req-2").unwrap();

        let txs = store
            .list_transactions_by_account(&account_id, 10, 0)
            .unwrap();
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].description, "second");
        assert_eq!(txs[1].description, "first");

        let page = store
            .list_transactions_by_account(&account_id, 1, 1)
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].description, "first");
    }

    #[test]
    fn job_lifecycle_indexes() {
        let (store, _dir) = create_test_store();
        let account_id = funded_account(&store, 10);
        let tx = store.reserve(&account_id, 4, "image job", "req-1").unwrap();

        let mut job = Job::new(account_id, 4, ProviderKind::Image, tx.id);
        store.put_job(&job).unwrap();

        // Reservation index resolves before submission confirms.
        let by_reservation = store.get_job_by_reservation(&tx.id).unwrap().unwrap();
        assert_eq!(by_reservation.id, job.id);
        assert_eq!(store.list_active_jobs().unwrap().len(), 1);

        // Submission confirmed.
        job.provider_ref = Some("prov-123".into());
        job.state = JobState::Submitted;
        store.update_job(&job).unwrap();

        let by_ref = store.get_job_by_provider_ref("prov-123").unwrap().unwrap();
        assert_eq!(by_ref.id, job.id);
        assert_eq!(by_ref.state, JobState::Submitted);

        // Terminal transition removes the job from the sweep set.
        job.state = JobState::Succeeded;
        job.durable_output = Some("https://cdn.lumera.app/image/abc".into());
        store.update_job(&job).unwrap();

        assert!(store.list_active_jobs().unwrap().is_empty());
        let stored = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Succeeded);

        let listed = store.list_jobs_by_account(&account_id, 10, 0).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn unknown_provider_ref_resolves_to_none() {
        let (store, _dir) = create_test_store();
        assert!(store.get_job_by_provider_ref("nope").unwrap().is_none());
    }
}
