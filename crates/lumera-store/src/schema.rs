//! Column family names.

/// Column family name constants.
pub mod cf {
    /// Account rows, keyed by account id.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger transactions, keyed by transaction id (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index for listing transactions by account.
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Ledger idempotency keys: `(account, key) -> transaction id`.
    pub const LEDGER_KEYS: &str = "ledger_keys";

    /// Job rows, keyed by job id (ULID).
    pub const JOBS: &str = "jobs";

    /// Index for listing jobs by account.
    pub const JOBS_BY_ACCOUNT: &str = "jobs_by_account";

    /// Index for resolving webhook notifications: provider ref -> job id.
    pub const JOBS_BY_PROVIDER_REF: &str = "jobs_by_provider_ref";

    /// Index for submit-retry dedup: reservation tx id -> job id.
    pub const JOBS_BY_RESERVATION: &str = "jobs_by_reservation";

    /// The sweep set: job ids in a non-terminal state.
    pub const ACTIVE_JOBS: &str = "active_jobs";
}

/// All column families, for database open.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::LEDGER_KEYS,
        cf::JOBS,
        cf::JOBS_BY_ACCOUNT,
        cf::JOBS_BY_PROVIDER_REF,
        cf::JOBS_BY_RESERVATION,
        cf::ACTIVE_JOBS,
    ]
}
