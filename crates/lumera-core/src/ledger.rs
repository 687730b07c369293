//! Ledger transaction types.
//!
//! Every balance mutation is recorded as exactly one immutable
//! `CreditTransaction`. Transactions are append-only: never updated,
//! never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, TransactionId};

/// An immutable ledger entry.
///
/// `amount` is signed: positive for grants and refunds, negative for
/// spends. `balance_after` is the account balance snapshot taken at commit
/// time. The idempotency key is unique per account and is what makes a
/// retried reserve or refund apply at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction id (ULID, time-ordered).
    pub id: TransactionId,

    /// The account whose balance changed.
    pub account_id: AccountId,

    /// Signed amount in credits. Positive = grant/refund, negative = spend.
    pub amount: i64,

    /// What caused the transaction.
    pub kind: TransactionKind,

    /// Human-readable reason, retained for support and audit.
    pub description: String,

    /// Account balance immediately after this transaction committed.
    pub balance_after: i64,

    /// Caller-supplied token, unique per account; a retried operation with
    /// the same key returns this transaction instead of creating another.
    pub idempotency_key: String,

    /// When the transaction was committed.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create a spend transaction. The stored amount is always negative.
    #[must_use]
    pub fn spend(
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        description: String,
        idempotency_key: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount: -amount.abs(),
            kind: TransactionKind::Spend,
            description,
            balance_after,
            idempotency_key,
            created_at: Utc::now(),
        }
    }

    /// Create a grant transaction of the given kind (welcome, subscription,
    /// purchase, refund, or bonus). The stored amount is always positive.
    #[must_use]
    pub fn grant(
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        balance_after: i64,
        description: String,
        idempotency_key: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount: amount.abs(),
            kind,
            description,
            balance_after,
            idempotency_key,
            created_at: Utc::now(),
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// One-time grant on account creation.
    WelcomeGrant,

    /// Monthly subscription credit grant.
    SubscriptionGrant,

    /// User purchased credits.
    Purchase,

    /// Credits reserved for a generation or training job.
    Spend,

    /// Reserved credits returned after a failed or expired job.
    Refund,

    /// Promotional or milestone credits.
    Bonus,
}

impl TransactionKind {
    /// Whether this kind increases the balance.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::WelcomeGrant
                | Self::SubscriptionGrant
                | Self::Purchase
                | Self::Refund
                | Self::Bonus
        )
    }

    /// Whether this kind decreases the balance.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Spend)
    }

    /// Stable string form used in API responses and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WelcomeGrant => "welcome_grant",
            Self::SubscriptionGrant => "subscription_grant",
            Self::Purchase => "purchase",
            Self::Spend => "spend",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_is_always_negative() {
        let account_id = AccountId::generate();
        let tx = CreditTransaction::spend(account_id, 4, 6, "image job".into(), "req-1".into());

        assert_eq!(tx.amount, -4);
        assert_eq!(tx.kind, TransactionKind::Spend);
        assert_eq!(tx.balance_after, 6);
    }

    #[test]
    fn refund_grant_is_positive() {
        let account_id = AccountId::generate();
        let tx = CreditTransaction::grant(
            account_id,
            4,
            TransactionKind::Refund,
            10,
            "generation failed, credits refunded".into(),
            "refund:job-1".into(),
        );

        assert_eq!(tx.amount, 4);
        assert_eq!(tx.kind, TransactionKind::Refund);
    }

    #[test]
    fn kind_credit_debit_split() {
        assert!(TransactionKind::WelcomeGrant.is_credit());
        assert!(TransactionKind::SubscriptionGrant.is_credit());
        assert!(TransactionKind::Purchase.is_credit());
        assert!(TransactionKind::Refund.is_credit());
        assert!(TransactionKind::Bonus.is_credit());
        assert!(!TransactionKind::Spend.is_credit());
        assert!(TransactionKind::Spend.is_debit());
    }
}
