//! Account types.
//!
//! An account is the balance-holding entity for one user. The balance is
//! always the sum of the account's committed transactions; it is never
//! derived from job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// A credit account.
///
/// Created on the first grant and never deleted, only zeroed. The version
/// counter increases by one on every committed balance mutation and is the
/// handle for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account id (matches the platform user id).
    pub id: AccountId,

    /// Current balance in credits. Never negative.
    pub balance: i64,

    /// Monotonic version, bumped on every committed mutation.
    pub version: u64,

    /// Lifetime credits granted (welcome, subscription, purchase, refund, bonus).
    pub lifetime_granted: i64,

    /// Lifetime credits spent on generation and training jobs.
    pub lifetime_spent: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            version: 0,
            lifetime_granted: 0,
            lifetime_spent: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the account can cover a spend of `amount` credits.
    #[must_use]
    pub fn has_sufficient_balance(&self, amount: i64) -> bool {
        self.balance >= amount
    }
}
