//! Credit ledger handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use lumera_core::{CreditTransaction, TransactionKind};
use lumera_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for transaction listings.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Maximum page size for transaction listings.
const MAX_LIST_LIMIT: usize = 200;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Lifetime credits granted.
    pub lifetime_granted: i64,
    /// Lifetime credits spent.
    pub lifetime_spent: i64,
}

/// Get an account's current balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(BalanceResponse {
        account_id: account.id.to_string(),
        balance: account.balance,
        lifetime_granted: account.lifetime_granted,
        lifetime_spent: account.lifetime_spent,
    }))
}

/// Transaction representation in API responses.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Signed amount: positive for grants/refunds, negative for spends.
    pub amount: i64,
    /// Transaction kind.
    pub kind: String,
    /// Human-readable reason.
    pub description: String,
    /// Balance immediately after this transaction.
    pub balance_after: i64,
    /// Commit timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionResponse {
    fn from_transaction(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            kind: tx.kind.as_str().to_string(),
            description: tx.description.clone(),
            balance_after: tx.balance_after,
            created_at: tx.created_at,
        }
    }
}

/// Query parameters for transaction listing.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Transaction listing response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<TransactionResponse>,
}

/// List an account's transactions, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let account_id = account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let transactions = state
        .store
        .list_transactions_by_account(&account_id, limit, offset)?;

    Ok(Json(ListTransactionsResponse {
        transactions: transactions
            .iter()
            .map(TransactionResponse::from_transaction)
            .collect(),
    }))
}

/// Grant request from a trusted platform service (signup flow, billing,
/// promotions).
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// Account to credit; created on first grant.
    pub account_id: String,
    /// Credits to grant. Must be positive.
    pub amount: i64,
    /// Grant kind: "welcome_grant", "subscription_grant", "purchase", or
    /// "bonus".
    pub kind: String,
    /// Human-readable reason, retained on the transaction.
    pub reason: String,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
}

/// Grant response.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// The committed (or replayed) transaction.
    pub transaction: TransactionResponse,
}

/// Grant credits to an account.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let account_id = body
        .account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let kind = parse_grant_kind(&body.kind)?;

    if body.idempotency_key.is_empty() {
        return Err(ApiError::BadRequest("idempotency_key is required".into()));
    }

    let tx = state.store.grant(
        &account_id,
        body.amount,
        kind,
        &body.reason,
        &body.idempotency_key,
    )?;

    tracing::info!(
        service = %auth.service_name,
        account_id = %account_id,
        amount = body.amount,
        kind = %kind.as_str(),
        transaction_id = %tx.id,
        "Credits granted"
    );

    Ok(Json(GrantResponse {
        transaction: TransactionResponse::from_transaction(&tx),
    }))
}

fn parse_grant_kind(kind: &str) -> Result<TransactionKind, ApiError> {
    let kind = match kind {
        "welcome_grant" => TransactionKind::WelcomeGrant,
        "subscription_grant" => TransactionKind::SubscriptionGrant,
        "purchase" => TransactionKind::Purchase,
        "bonus" => TransactionKind::Bonus,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown grant kind: {other}"
            )))
        }
    };
    Ok(kind)
}
