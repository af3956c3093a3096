use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::credits::ledger::{LedgerEntry, LedgerError, PaymentRecord};
use crate::credits::Credits;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditAccountRow {
    pub account_id: String,
    pub balance_millis: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditEntryRow {
    pub id: Uuid,
    pub account_id: String,
    pub kind: String,
    pub delta_millis: i64,
    pub balance_after_millis: i64,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditGrantRow {
    pub idempotency_key: String,
    pub account_id: String,
    pub credits_millis: i64,
    pub plan: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditGrantRow> for PaymentRecord {
    fn from(row: CreditGrantRow) -> Self {
        PaymentRecord {
            session_id: row.idempotency_key,
            account_id: row.account_id,
            credits: Credits::from_millis(row.credits_millis),
            plan: row.plan,
            amount_minor: row.amount_minor,
            currency: row.currency,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<CreditEntryRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: CreditEntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind.parse()?,
            delta: Credits::from_millis(row.delta_millis),
            balance_after: Credits::from_millis(row.balance_after_millis),
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::ledger::EntryKind;

    #[test]
    fn test_entry_row_converts_to_ledger_entry() {
        let row = CreditEntryRow {
            id: Uuid::new_v4(),
            account_id: "ada@example.com".to_string(),
            kind: "reserve".to_string(),
            delta_millis: -500,
            balance_after_millis: 500,
            reference: None,
            created_at: Utc::now(),
        };

        let entry = LedgerEntry::try_from(row).unwrap();

        assert_eq!(entry.kind, EntryKind::Reserve);
        assert_eq!(entry.delta, -Credits::from_millis(500));
        assert_eq!(entry.balance_after, Credits::from_millis(500));
    }

    #[test]
    fn test_entry_row_with_unknown_kind_fails() {
        let row = CreditEntryRow {
            id: Uuid::new_v4(),
            account_id: "ada@example.com".to_string(),
            kind: "chargeback".to_string(),
            delta_millis: 0,
            balance_after_millis: 0,
            reference: None,
            created_at: Utc::now(),
        };
        assert!(LedgerEntry::try_from(row).is_err());
    }

    #[test]
    fn test_grant_row_converts_to_payment_record() {
        let row = CreditGrantRow {
            idempotency_key: "cs_test_1".to_string(),
            account_id: "ada@example.com".to_string(),
            credits_millis: 250_000,
            plan: Some("popular".to_string()),
            amount_minor: Some(1_499),
            currency: Some("eur".to_string()),
            created_at: Utc::now(),
        };

        let payment = PaymentRecord::from(row);

        assert_eq!(payment.session_id, "cs_test_1");
        assert_eq!(payment.credits, Credits::from_whole(250));
        assert_eq!(payment.amount_minor, Some(1_499));
        assert_eq!(payment.currency.as_deref(), Some("eur"));
    }
}
