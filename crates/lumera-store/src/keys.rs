//! Key encodings for the column families.
//!
//! Ids are fixed-width 16-byte prefixes, so composite keys can be split
//! without delimiters and ULID suffixes keep per-account ranges in
//! creation order.

use lumera_core::{AccountId, JobId, TransactionId};

/// Account row key.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Transaction row key.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Account-transaction index key: `account_id (16) || transaction_id (16)`.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Ledger idempotency key: `account_id (16) || caller key (variable)`.
#[must_use]
pub fn ledger_idempotency_key(account_id: &AccountId, idempotency_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + idempotency_key.len());
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(idempotency_key.as_bytes());
    key
}

/// Job row key.
#[must_use]
pub fn job_key(job_id: &JobId) -> Vec<u8> {
    job_id.to_bytes().to_vec()
}

/// Account-job index key: `account_id (16) || job_id (16)`.
#[must_use]
pub fn account_job_key(account_id: &AccountId, job_id: &JobId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&job_id.to_bytes());
    key
}

/// Prefix for iterating an account's range in a 16-byte-prefixed index.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the trailing 16-byte id from a 32-byte composite index key.
///
/// # Panics
///
/// Panics if the key is shorter than 32 bytes.
#[must_use]
pub fn suffix_id_bytes(key: &[u8]) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_layout() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_transaction_key(&account_id, &tx_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
    }

    #[test]
    fn suffix_extraction_roundtrip() {
        let account_id = AccountId::generate();
        let job_id = JobId::generate();
        let key = account_job_key(&account_id, &job_id);

        let extracted = JobId::from_bytes(suffix_id_bytes(&key)).unwrap();
        assert_eq!(extracted, job_id);
    }

    #[test]
    fn idempotency_key_is_account_scoped() {
        let a = AccountId::generate();
        let b = AccountId::generate();

        assert_ne!(
            ledger_idempotency_key(&a, "req-1"),
            ledger_idempotency_key(&b, "req-1")
        );
    }
}
