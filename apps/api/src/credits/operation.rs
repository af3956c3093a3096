//! Paid operations: the protocol every billable LLM call goes through.
//!
//! Flow: CHECKING (request validation, done by the handler) → RESERVED (credits
//! deducted up front) → SUCCEEDED (charge kept) or REFUNDED (charge restored).
//!
//! The charge is taken before the external call so that two concurrent requests cannot
//! both pass a balance check and both get a free result. Settlement runs on a detached
//! task: if the client disconnects mid-call the refund path still executes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::credits::ledger::{CreditLedger, LedgerError};
use crate::credits::{Credits, OperationKind};

/// Refund attempts before the loss is reported.
const MAX_REFUND_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Checking,
    Reserved,
    Succeeded,
    Refunded,
}

/// Output of an external call. Output that is not meaningful is treated as a failure.
pub trait PaidOutput {
    fn is_meaningful(&self) -> bool;
}

impl PaidOutput for String {
    fn is_meaningful(&self) -> bool {
        !self.trim().is_empty()
    }
}

#[derive(Debug)]
pub struct PaidOutcome<T> {
    pub output: T,
    /// Balance right after the reservation.
    pub credits_left: Credits,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("{kind} failed ({reason}); {refunded} credits refunded")]
    Failed {
        kind: OperationKind,
        reason: String,
        refunded: Credits,
        credits_left: Credits,
    },

    /// The external call failed and the credits could not be restored.
    #[error("{kind} failed ({reason}) and refunding {cost} credits to {account_id} failed: {refund_error}")]
    RefundFailed {
        kind: OperationKind,
        account_id: String,
        cost: Credits,
        reason: String,
        refund_error: LedgerError,
    },

    #[error("{kind} settlement for {account_id} aborted: {reason}")]
    Aborted {
        kind: OperationKind,
        account_id: String,
        reason: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl OperationError {
    /// The state the operation ended in.
    pub fn state(&self) -> OperationState {
        match self {
            OperationError::InsufficientCredits { .. }
            | OperationError::AccountNotFound(_)
            | OperationError::Ledger(_) => OperationState::Checking,
            OperationError::Failed { .. } => OperationState::Refunded,
            OperationError::RefundFailed { .. } | OperationError::Aborted { .. } => {
                OperationState::Reserved
            }
        }
    }
}

impl From<LedgerError> for OperationError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => OperationError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::AccountNotFound(account_id) => OperationError::AccountNotFound(account_id),
            other => OperationError::Ledger(other),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reservation
// ────────────────────────────────────────────────────────────────────────────

/// Credits already deducted for one operation.
///
/// Settled exactly once, by `commit` or `refund`, both of which consume it. The refund
/// amount is always the reserved cost, and the ledger applies at most one refund per
/// `reservation_id`, so retrying after a lost acknowledgement cannot credit twice.
struct Reservation {
    ledger: Arc<dyn CreditLedger>,
    reservation_id: Uuid,
    account_id: String,
    kind: OperationKind,
    credits_left: Credits,
    state: OperationState,
}

impl Reservation {
    fn transition(&mut self, next: OperationState) {
        info!(
            "{} for {}: {:?} -> {:?}",
            self.kind, self.account_id, self.state, next
        );
        self.state = next;
    }

    fn commit(mut self) -> Credits {
        self.transition(OperationState::Succeeded);
        self.credits_left
    }

    async fn refund(mut self, reason: String) -> OperationError {
        let cost = self.kind.cost();
        warn!(
            "{} for {} failed, refunding {} credits: {}",
            self.kind, self.account_id, cost, reason
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .ledger
                .refund(&self.account_id, self.reservation_id, cost)
                .await;
            match result {
                Ok(outcome) => {
                    if !outcome.applied {
                        info!(
                            "Refund of reservation {} was already recorded",
                            self.reservation_id
                        );
                    }
                    self.transition(OperationState::Refunded);
                    return OperationError::Failed {
                        kind: self.kind,
                        reason,
                        refunded: cost,
                        credits_left: outcome.balance,
                    };
                }
                Err(e) if e.is_transient() && attempt < MAX_REFUND_ATTEMPTS => {
                    warn!(
                        "Refund attempt {attempt}/{MAX_REFUND_ATTEMPTS} for {} failed: {e}",
                        self.account_id
                    );
                    tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
                }
                Err(e) => {
                    error!(
                        "LOST CREDIT: {} credits for {} ({}, reservation {}) could not be refunded: {}",
                        cost, self.account_id, self.kind, self.reservation_id, e
                    );
                    // Reported through RefundFailed; nothing left for Drop to flag.
                    self.state = OperationState::Refunded;
                    return OperationError::RefundFailed {
                        kind: self.kind,
                        account_id: self.account_id.clone(),
                        cost,
                        reason,
                        refund_error: e,
                    };
                }
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.state == OperationState::Reserved {
            error!(
                "LOST CREDIT: reservation of {} credits for {} ({}) dropped without settlement",
                self.kind.cost(),
                self.account_id,
                self.kind
            );
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PaidOperation
// ────────────────────────────────────────────────────────────────────────────

/// One billable unit of work for one account.
pub struct PaidOperation {
    ledger: Arc<dyn CreditLedger>,
    account_id: String,
    kind: OperationKind,
    timeout: Duration,
}

impl PaidOperation {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        account_id: impl Into<String>,
        kind: OperationKind,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            account_id: account_id.into(),
            kind,
            timeout,
        }
    }

    /// Reserves the operation's cost, runs `work`, and keeps or refunds the charge.
    ///
    /// `work` is not polled at all when the reservation fails. Errors, panics, timeouts
    /// and empty output all end in a refund.
    pub async fn run<T, E, Fut>(self, work: Fut) -> Result<PaidOutcome<T>, OperationError>
    where
        T: PaidOutput + Send + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let kind = self.kind;
        let account_id = self.account_id.clone();
        let timeout = self.timeout;
        let reservation = self.reserve().await?;

        match tokio::spawn(settle(reservation, timeout, work)).await {
            Ok(result) => result,
            Err(join_error) => {
                error!("LOST CREDIT: settlement of {kind} for {account_id} aborted: {join_error}");
                Err(OperationError::Aborted {
                    kind,
                    account_id,
                    reason: join_error.to_string(),
                })
            }
        }
    }

    async fn reserve(self) -> Result<Reservation, OperationError> {
        let cost = self.kind.cost();
        let receipt = self.ledger.reserve(&self.account_id, cost).await?;

        let mut reservation = Reservation {
            ledger: self.ledger,
            reservation_id: receipt.reservation_id,
            account_id: self.account_id,
            kind: self.kind,
            credits_left: receipt.balance,
            state: OperationState::Checking,
        };
        reservation.transition(OperationState::Reserved);
        Ok(reservation)
    }
}

/// Runs the external call on its own task so a panic surfaces as a `JoinError`
/// instead of unwinding through the settlement.
async fn settle<T, E, Fut>(
    reservation: Reservation,
    timeout: Duration,
    work: Fut,
) -> Result<PaidOutcome<T>, OperationError>
where
    T: PaidOutput + Send + 'static,
    E: fmt::Display + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut task = tokio::spawn(work);

    let reason = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(output))) if output.is_meaningful() => {
            let credits_left = reservation.commit();
            return Ok(PaidOutcome {
                output,
                credits_left,
            });
        }
        Ok(Ok(Ok(_))) => "external call returned empty output".to_string(),
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join_error)) => format!("external call aborted: {join_error}"),
        Err(_) => {
            task.abort();
            format!("external call timed out after {}s", timeout.as_secs_f32())
        }
    };

    Err(reservation.refund(reason).await)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
