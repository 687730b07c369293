//! `RocksDB` storage layer for the Lumera ledger and job registry.
//!
//! This crate provides persistent storage for accounts, ledger
//! transactions, and generation jobs using `RocksDB` with column families
//! for the secondary indexes.
//!
//! # Column families
//!
//! - `accounts`: materialized balance rows, keyed by account id
//! - `transactions`: append-only ledger entries, keyed by ULID
//! - `transactions_by_account`: listing index
//! - `ledger_keys`: idempotency index, `(account, key) -> transaction id`
//! - `jobs`: job rows, keyed by ULID
//! - `jobs_by_account`, `jobs_by_provider_ref`, `jobs_by_reservation`:
//!   lookup indexes
//! - `active_jobs`: the sweep set of non-terminal jobs
//!
//! # Ledger discipline
//!
//! `reserve` and `grant` serialize per account (an interior lock table)
//! and commit the account row, the transaction row, and both indexes in a
//! single `WriteBatch`, so a balance mutation and its transaction are
//! atomic. The idempotency index is consulted before any mutation: a
//! retried call with a known key returns the original transaction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use lumera_core::{Account, AccountId, CreditTransaction, Job, JobId, TransactionId, TransactionKind};

/// The storage trait defining the ledger and job-registry operations.
///
/// Abstracted so tests and alternative backends can stand in for
/// `RocksStore`.
pub trait Store: Send + Sync {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Current balance of an account. Reflects only committed transactions.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn balance(&self, account_id: &AccountId) -> Result<i64>;

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Reserve `amount` credits: check balance, write a negative spend
    /// transaction, and decrement the balance atomically.
    ///
    /// Idempotent: a call with a previously seen key returns the recorded
    /// transaction without re-mutating the balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientBalance` if the balance is too low; no
    ///   mutation is performed.
    /// - `StoreError::InvalidAmount` if `amount` is not positive.
    fn reserve(
        &self,
        account_id: &AccountId,
        amount: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<CreditTransaction>;

    /// Grant `amount` credits of the given kind. Creates the account on
    /// first grant. Same idempotency contract as [`Store::reserve`].
    ///
    /// A refund is a grant with `kind = Refund` and an idempotency key
    /// derived from the job id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidAmount` if `amount` is not positive.
    fn grant(
        &self,
        account_id: &AccountId,
        amount: i64,
        kind: TransactionKind,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<CreditTransaction>;

    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId)
        -> Result<Option<CreditTransaction>>;

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Job registry
    // =========================================================================

    /// Insert a new job row and its indexes. The job enters the active set
    /// unless it is already terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_job(&self, job: &Job) -> Result<()>;

    /// Rewrite a job row, maintaining the provider-ref index and removing
    /// the job from the active set once terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_job(&self, job: &Job) -> Result<()>;

    /// Get a job by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Resolve a provider reference id to its job.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Job>>;

    /// Resolve a reservation transaction to its job, if one was created.
    /// Used to make retried submissions idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job_by_reservation(&self, reservation_tx: &TransactionId) -> Result<Option<Job>>;

    /// All jobs currently in a non-terminal state, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_active_jobs(&self) -> Result<Vec<Job>>;

    /// List an account's jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_jobs_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>>;
}
