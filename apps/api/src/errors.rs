use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::credits::ledger::LedgerError;
use crate::credits::operation::OperationError;
use crate::credits::{Credits, OperationKind};

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    /// The paid call failed and its cost was refunded.
    #[error("{kind} failed: {reason}")]
    OperationFailed {
        kind: OperationKind,
        reason: String,
        refunded: Credits,
        credits_left: Credits,
    },

    /// The paid call failed and the refund did not go through.
    #[error("Credit refund failed: {0}")]
    RefundFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => AppError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::AccountNotFound(account_id) => {
                AppError::NotFound(format!("No credit account for {account_id}"))
            }
            LedgerError::InvalidAmount(amount) => {
                AppError::Validation(format!("Invalid credit amount: {amount}"))
            }
            LedgerError::Database(e) => AppError::Database(e),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<OperationError> for AppError {
    fn from(e: OperationError) -> Self {
        match e {
            OperationError::InsufficientCredits {
                required,
                available,
            } => AppError::InsufficientCredits {
                required,
                available,
            },
            OperationError::AccountNotFound(account_id) => {
                AppError::NotFound(format!("No credit account for {account_id}"))
            }
            OperationError::Failed {
                kind,
                reason,
                refunded,
                credits_left,
            } => AppError::OperationFailed {
                kind,
                reason,
                refunded,
                credits_left,
            },
            e @ (OperationError::RefundFailed { .. } | OperationError::Aborted { .. }) => {
                AppError::RefundFailed(e.to_string())
            }
            OperationError::Ledger(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut credits_left = None;
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::InsufficientCredits {
                required,
                available,
            } => {
                credits_left = Some(*available);
                (
                    StatusCode::PAYMENT_REQUIRED,
                    "INSUFFICIENT_CREDITS",
                    format!("Insufficient credits. You need {required} credits for this operation."),
                )
            }
            AppError::OperationFailed {
                kind,
                reason,
                refunded,
                credits_left: left,
            } => {
                tracing::error!("{kind} failed: {reason}");
                credits_left = Some(*left);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "OPERATION_FAILED",
                    format!("Generation failed. {refunded} credits have been refunded."),
                )
            }
            AppError::RefundFailed(msg) => {
                tracing::error!("Refund failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "REFUND_FAILED",
                    "Generation failed and your credits could not be restored automatically. \
                     Support has been notified."
                        .to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(left) = credits_left {
            error["credits_left"] = json!(left);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
