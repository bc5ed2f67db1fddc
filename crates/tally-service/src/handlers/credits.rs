//! Credit ledger handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{CreditBalance, CreditTransaction, Related, TransactionType, UserId};

use crate::error::ApiError;
use crate::gate::{self, RequestSignals};
use crate::state::AppState;
use crate::trial;

/// Default page size for transaction listings.
const DEFAULT_PAGE_SIZE: usize = 50;

/// Maximum page size for transaction listings.
const MAX_PAGE_SIZE: usize = 200;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// User ID.
    pub user_id: String,
    /// Spendable credits right now.
    pub current_balance: i64,
    /// Lifetime credits earned.
    pub total_earned: i64,
    /// Lifetime credits spent.
    pub total_spent: i64,
    /// Last update timestamp.
    pub updated_at: String,
}

impl From<&CreditBalance> for BalanceResponse {
    fn from(balance: &CreditBalance) -> Self {
        Self {
            user_id: balance.user_id.to_string(),
            current_balance: balance.current_balance,
            total_earned: balance.total_earned,
            total_spent: balance.total_spent,
            updated_at: balance.updated_at.to_rfc3339(),
        }
    }
}

/// Get a user's credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.store.get_balance(&user_id)?;
    Ok(Json(BalanceResponse::from(&balance)))
}

/// Pagination query for transaction listings.
#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    /// Page size (default 50, capped at 200).
    pub limit: Option<usize>,
    /// Number of transactions to skip.
    pub offset: Option<usize>,
}

/// Transaction listing response.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<CreditTransaction>,
    /// Applied page size.
    pub limit: usize,
    /// Applied offset.
    pub offset: usize,
}

/// List a user's transactions, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let transactions = state.store.list_transactions(&user_id, limit, offset)?;

    Ok(Json(TransactionsResponse {
        transactions,
        limit,
        offset,
    }))
}

/// Debit request.
#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    /// The user to debit.
    pub user_id: UserId,
    /// Credits to consume (positive).
    pub amount: i64,
    /// What the debit pays for.
    pub description: Option<String>,
    /// Related record type for idempotent debits.
    pub related_type: Option<String>,
    /// Related record id for idempotent debits.
    pub related_id: Option<String>,
    /// Billing country code, when known.
    pub billing_country: Option<String>,
    /// Request IP address, when forwarded by the caller.
    pub ip: Option<String>,
    /// Request user agent, when forwarded by the caller.
    pub user_agent: Option<String>,
    /// Account age in hours, when the caller knows it.
    pub account_age_hours: Option<i64>,
}

/// Posted transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction id.
    pub transaction_id: String,
    /// Signed amount posted.
    pub amount: i64,
    /// Balance after the posting.
    pub balance_after: i64,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            transaction_id: tx.id.to_string(),
            amount: tx.amount,
            balance_after: tx.balance_after,
        }
    }
}

/// Debit credits for usage.
///
/// Runs the fraud gate first, then tracks trial consumption when a trial is
/// active, then posts the ledger debit. The ledger is the source of truth for
/// the balance; the trial bump only maintains the trial's own cap, and a
/// rejected ledger debit releases it again so the cap and the ledger move
/// together.
pub async fn debit_credits(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DebitRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("Amount must be positive".into()));
    }

    let signals = RequestSignals {
        payment_method: None,
        billing_country: body.billing_country.clone(),
        ip: body.ip.clone(),
        user_agent: body.user_agent.clone(),
        account_age_hours: body.account_age_hours,
    };
    gate::assess(&state, body.user_id, body.amount, &signals)?;

    let consumed_from_trial = if trial::is_active(&state, &body.user_id)? {
        trial::consume(&state, &body.user_id, body.amount)?;
        true
    } else {
        false
    };

    let related = match (&body.related_type, &body.related_id) {
        (Some(t), Some(i)) => Some(Related::new(t.clone(), i.clone())),
        _ => None,
    };
    let tx = match state.store.debit(
        &body.user_id,
        body.amount,
        TransactionType::UsageDebit,
        related,
        body.description.as_deref().unwrap_or("Usage debit"),
    ) {
        Ok(tx) => tx,
        Err(err) => {
            // The ledger refused the posting (duplicate retry, insufficient
            // balance), so the cap bump above must not stand: a replayed
            // idempotent debit would otherwise count twice against the trial.
            if consumed_from_trial {
                if let Err(release_err) = trial::release(&state, &body.user_id, body.amount) {
                    tracing::error!(
                        user_id = %body.user_id,
                        amount = %body.amount,
                        error = %release_err,
                        "Failed to release trial credits after rejected debit"
                    );
                }
            }
            return Err(err.into());
        }
    };

    tracing::info!(
        user_id = %body.user_id,
        amount = %body.amount,
        new_balance = %tx.balance_after,
        "Credits debited"
    );
    Ok(Json(TransactionResponse::from(&tx)))
}

/// Add-credits request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// The user to credit.
    pub user_id: UserId,
    /// Credits to add (positive).
    pub amount: i64,
    /// Why the grant happened.
    pub description: Option<String>,
    /// Related record type for idempotent grants.
    pub related_type: Option<String>,
    /// Related record id for idempotent grants.
    pub related_id: Option<String>,
}

/// Grant credits outside the provider flow (promotions, support).
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddCreditsRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("Amount must be positive".into()));
    }

    let related = match (&body.related_type, &body.related_id) {
        (Some(t), Some(i)) => Some(Related::new(t.clone(), i.clone())),
        _ => None,
    };
    let tx = state.store.credit(
        &body.user_id,
        body.amount,
        TransactionType::Bonus,
        related,
        body.description.as_deref().unwrap_or("Bonus credits"),
    )?;

    tracing::info!(
        user_id = %body.user_id,
        amount = %body.amount,
        new_balance = %tx.balance_after,
        "Credits added"
    );
    Ok(Json(TransactionResponse::from(&tx)))
}
