//! Axum route handlers for the caller's credit account.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::VerifiedAccount;
use crate::credits::ledger::LedgerEntry;
use crate::credits::Credits;
use crate::errors::AppError;
use crate::extract::AppQuery;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub credits: Credits,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub account_id: String,
    pub entries: Vec<LedgerEntry>,
}

/// POST /api/account
///
/// Opens the caller's account at zero credits. Calling it again is a no-op that
/// returns the current balance.
pub async fn handle_open_account(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
) -> Result<Json<BalanceResponse>, AppError> {
    let credits = state.ledger.open_account(&account_id).await?;
    info!("Account ready: {account_id} ({credits} credits)");

    Ok(Json(BalanceResponse {
        account_id,
        credits,
    }))
}

/// GET /api/credits
pub async fn handle_get_credits(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
) -> Result<Json<BalanceResponse>, AppError> {
    let credits = state.ledger.get_balance(&account_id).await?;

    Ok(Json(BalanceResponse {
        account_id,
        credits,
    }))
}

/// GET /api/credits/history?limit=N
///
/// Newest entries first. `limit` is clamped to 1..=200 and defaults to 50.
pub async fn handle_credit_history(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let entries = state
        .ledger
        .history(&account_id, history_limit(query.limit))
        .await?;

    Ok(Json(HistoryResponse {
        account_id,
        entries,
    }))
}

pub(crate) fn history_limit(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_HISTORY_LIMIT,
        Some(n) => usize::try_from(n)
            .unwrap_or(1)
            .clamp(1, MAX_HISTORY_LIMIT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_limit_defaults_and_clamps() {
        assert_eq!(history_limit(None), 50);
        assert_eq!(history_limit(Some(10)), 10);
        assert_eq!(history_limit(Some(0)), 1);
        assert_eq!(history_limit(Some(-5)), 1);
        assert_eq!(history_limit(Some(10_000)), 200);
    }
}
