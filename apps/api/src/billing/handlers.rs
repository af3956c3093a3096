//! Axum route handlers for the payment webhook and payment history.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::auth::VerifiedAccount;
use crate::billing::webhook::{
    process_event, WebhookError, WebhookEvent, WebhookOutcome, SIGNATURE_HEADER,
};
use crate::credits::handlers::{history_limit, HistoryQuery};
use crate::credits::ledger::PaymentRecord;
use crate::errors::AppError;
use crate::extract::AppQuery;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentsResponse {
    pub account_id: String,
    pub payments: Vec<PaymentRecord>,
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        warn!("Rejected webhook delivery: {e}");
        AppError::Validation(e.to_string())
    }
}

/// POST /api/billing/webhook
///
/// 400 for deliveries that fail verification, 200 for every verified event (granted,
/// duplicate or ignored). Ledger failures are 500 so the provider redelivers; grants
/// are idempotent, so a redelivery can never double-credit.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    state
        .webhook
        .verify(signature, &body, Utc::now().timestamp())?;

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(WebhookError::from)?;
    let outcome = process_event(state.ledger.as_ref(), event).await?;

    Ok(Json(outcome))
}

/// GET /api/billing/payments?limit=N
///
/// The caller's applied payments, newest first. Same `limit` rules as credit history.
pub async fn handle_list_payments(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> Result<Json<PaymentsResponse>, AppError> {
    let payments = state
        .ledger
        .payments(&account_id, history_limit(query.limit))
        .await?;

    Ok(Json(PaymentsResponse {
        account_id,
        payments,
    }))
}
