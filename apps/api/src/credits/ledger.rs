//! The credit ledger contract.
//!
//! Every balance mutation goes through `reserve`, `refund` or `grant`. Backends must
//! make each of those a single atomic read-modify-write against their store.
//!
//! `AppState` holds an `Arc<dyn CreditLedger>`: Postgres in production, the in-memory
//! ledger in tests.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::credits::Credits;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(Credits),

    #[error("Balance overflow for account {0}")]
    Overflow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Whether retrying the same call can succeed: lost connections, pool exhaustion,
    /// serialization failures and deadlocks.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Database(e) => match e {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                    true
                }
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001" | "40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Kind of balance mutation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Reserve,
    Refund,
    Grant,
}

impl EntryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntryKind::Reserve => "reserve",
            EntryKind::Refund => "refund",
            EntryKind::Grant => "grant",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve" => Ok(EntryKind::Reserve),
            "refund" => Ok(EntryKind::Refund),
            "grant" => Ok(EntryKind::Grant),
            other => Err(LedgerError::Corrupt(format!("unknown entry kind '{other}'"))),
        }
    }
}

/// One append-only audit record. `delta` is negative for reservations.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: String,
    pub kind: EntryKind,
    pub delta: Credits,
    pub balance_after: Credits,
    /// Payment session id for grants.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for applying a payment to an account.
#[derive(Debug, Clone, Copy)]
pub struct GrantParams<'a> {
    pub account_id: &'a str,
    pub credits: Credits,
    /// Unique per payment event, e.g. the checkout session id.
    pub idempotency_key: &'a str,
    pub plan: Option<&'a str>,
    /// Amount paid, in minor currency units.
    pub amount_minor: Option<i64>,
    pub currency: Option<&'a str>,
}

/// A payment applied to an account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub session_id: String,
    pub account_id: String,
    pub credits: Credits,
    pub plan: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A successful reservation. The id is what a later refund is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveReceipt {
    pub reservation_id: Uuid,
    pub balance: Credits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundOutcome {
    pub balance: Credits,
    /// `false` when this reservation had already been refunded.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub balance: Credits,
    /// `false` when the idempotency key had already been applied.
    pub applied: bool,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Creates the account at zero if it does not exist. Returns the current balance.
    async fn open_account(&self, account_id: &str) -> Result<Credits, LedgerError>;

    /// Unknown accounts read as zero.
    async fn get_balance(&self, account_id: &str) -> Result<Credits, LedgerError>;

    /// Optimistic pre-check only. `reserve` is the authoritative gate.
    async fn has_sufficient_credits(
        &self,
        account_id: &str,
        cost: Credits,
    ) -> Result<bool, LedgerError> {
        if cost.is_negative() {
            return Err(LedgerError::InvalidAmount(cost));
        }
        Ok(self.get_balance(account_id).await? >= cost)
    }

    /// Atomically deducts `cost` if the balance covers it.
    async fn reserve(&self, account_id: &str, cost: Credits)
        -> Result<ReserveReceipt, LedgerError>;

    /// Atomically restores `amount` taken by `reservation_id`, at most once per
    /// reservation. `amount` may not exceed the reserved cost.
    async fn refund(
        &self,
        account_id: &str,
        reservation_id: Uuid,
        amount: Credits,
    ) -> Result<RefundOutcome, LedgerError>;

    /// Applies a payment at most once per idempotency key. Creates the account if needed.
    async fn grant(&self, params: GrantParams<'_>) -> Result<GrantOutcome, LedgerError>;

    /// Most recent entries first.
    async fn history(&self, account_id: &str, limit: usize)
        -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Payments applied to the account, most recent first.
    async fn payments(&self, account_id: &str, limit: usize)
        -> Result<Vec<PaymentRecord>, LedgerError>;
}

pub(crate) fn require_positive(amount: Credits) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}
