//! In-process credit ledger.
//!
//! A single `RwLock` guards balances, applied grant keys, reservations and the audit log
//! together, so every mutation is one critical section. Used by tests and local runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::credits::ledger::{
    require_positive, CreditLedger, EntryKind, GrantOutcome, GrantParams, LedgerEntry,
    LedgerError, PaymentRecord, RefundOutcome, ReserveReceipt,
};
use crate::credits::Credits;

#[derive(Debug)]
struct Reserved {
    account_id: String,
    cost: Credits,
}

#[derive(Debug, Default)]
struct MemoryLedgerData {
    balances: HashMap<String, Credits>,
    applied_grants: HashSet<String>,
    payments: Vec<PaymentRecord>,
    reservations: HashMap<Uuid, Reserved>,
    refunded: HashSet<Uuid>,
    entries: Vec<LedgerEntry>,
}

impl MemoryLedgerData {
    fn record(
        &mut self,
        account_id: &str,
        kind: EntryKind,
        delta: Credits,
        balance_after: Credits,
        reference: Option<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(LedgerEntry {
            id,
            account_id: account_id.to_string(),
            kind,
            delta,
            balance_after,
            reference,
            created_at: Utc::now(),
        });
        id
    }

    fn balance(&self, account_id: &str) -> Result<Credits, LedgerError> {
        self.balances
            .get(account_id)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    data: RwLock<MemoryLedgerData>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account with a starting balance, bypassing the audit log.
    pub async fn with_account(self, account_id: &str, balance: Credits) -> Self {
        self.data
            .write()
            .await
            .balances
            .insert(account_id.to_string(), balance);
        self
    }
}

#[async_trait]
impl CreditLedger for MemoryLedger {
    async fn open_account(&self, account_id: &str) -> Result<Credits, LedgerError> {
        let mut data = self.data.write().await;
        let balance = *data
            .balances
            .entry(account_id.to_string())
            .or_insert(Credits::ZERO);
        Ok(balance)
    }

    async fn get_balance(&self, account_id: &str) -> Result<Credits, LedgerError> {
        let data = self.data.read().await;
        Ok(data
            .balances
            .get(account_id)
            .copied()
            .unwrap_or(Credits::ZERO))
    }

    async fn reserve(
        &self,
        account_id: &str,
        cost: Credits,
    ) -> Result<ReserveReceipt, LedgerError> {
        require_positive(cost)?;
        let mut data = self.data.write().await;

        let available = data.balance(account_id)?;
        if available < cost {
            debug!("Reserve of {cost} rejected for {account_id}: balance {available}");
            return Err(LedgerError::InsufficientCredits {
                required: cost,
                available,
            });
        }

        let balance = available
            .checked_sub(cost)
            .ok_or_else(|| LedgerError::Overflow(account_id.to_string()))?;
        data.balances.insert(account_id.to_string(), balance);
        let reservation_id = data.record(account_id, EntryKind::Reserve, -cost, balance, None);
        data.reservations.insert(
            reservation_id,
            Reserved {
                account_id: account_id.to_string(),
                cost,
            },
        );

        info!("Reserved {cost} credits for {account_id} ({reservation_id}), balance now {balance}");
        Ok(ReserveReceipt {
            reservation_id,
            balance,
        })
    }

    async fn refund(
        &self,
        account_id: &str,
        reservation_id: Uuid,
        amount: Credits,
    ) -> Result<RefundOutcome, LedgerError> {
        require_positive(amount)?;
        let mut data = self.data.write().await;

        let reserved = data
            .reservations
            .get(&reservation_id)
            .filter(|r| r.account_id == account_id)
            .map(|r| r.cost)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        if amount > reserved {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let current = data.balance(account_id)?;
        if data.refunded.contains(&reservation_id) {
            info!("Reservation {reservation_id} already refunded, balance for {account_id} unchanged");
            return Ok(RefundOutcome {
                balance: current,
                applied: false,
            });
        }

        let balance = current
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(account_id.to_string()))?;
        data.refunded.insert(reservation_id);
        data.balances.insert(account_id.to_string(), balance);
        data.record(
            account_id,
            EntryKind::Refund,
            amount,
            balance,
            Some(reservation_id.to_string()),
        );

        info!("Refunded {amount} credits to {account_id} ({reservation_id}), balance now {balance}");
        Ok(RefundOutcome {
            balance,
            applied: true,
        })
    }

    async fn grant(&self, params: GrantParams<'_>) -> Result<GrantOutcome, LedgerError> {
        require_positive(params.credits)?;
        let mut data = self.data.write().await;

        let current = data
            .balances
            .get(params.account_id)
            .copied()
            .unwrap_or(Credits::ZERO);

        if data.applied_grants.contains(params.idempotency_key) {
            info!(
                "Grant {} already applied, balance for {} unchanged",
                params.idempotency_key, params.account_id
            );
            return Ok(GrantOutcome {
                balance: current,
                applied: false,
            });
        }

        let new_balance = current
            .checked_add(params.credits)
            .ok_or_else(|| LedgerError::Overflow(params.account_id.to_string()))?;
        data.applied_grants
            .insert(params.idempotency_key.to_string());
        data.payments.push(PaymentRecord {
            session_id: params.idempotency_key.to_string(),
            account_id: params.account_id.to_string(),
            credits: params.credits,
            plan: params.plan.map(str::to_string),
            amount_minor: params.amount_minor,
            currency: params.currency.map(str::to_string),
            created_at: Utc::now(),
        });
        data.balances
            .insert(params.account_id.to_string(), new_balance);
        data.record(
            params.account_id,
            EntryKind::Grant,
            params.credits,
            new_balance,
            Some(params.idempotency_key.to_string()),
        );

        info!(
            "Granted {} credits to {} (plan {:?}), balance now {}",
            params.credits, params.account_id, params.plan, new_balance
        );
        Ok(GrantOutcome {
            balance: new_balance,
            applied: true,
        })
    }

    async fn history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let data = self.data.read().await;
        Ok(data
            .entries
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn payments(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, LedgerError> {
        let data = self.data.read().await;
        Ok(data
            .payments
            .iter()
            .rev()
            .filter(|p| p.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const ACCOUNT: &str = "ada@example.com";

    fn grant<'a>(credits: i64, key: &'a str) -> GrantParams<'a> {
        GrantParams {
            account_id: ACCOUNT,
            credits: Credits::from_whole(credits),
            idempotency_key: key,
            plan: Some("basic"),
            amount_minor: Some(999),
            currency: Some("eur"),
        }
    }

    #[tokio::test]
    async fn test_unknown_account_reads_as_zero() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get_balance("nobody@example.com").await.unwrap(), Credits::ZERO);
        assert!(!ledger
            .has_sufficient_credits("nobody@example.com", Credits::from_millis(1))
            .await
            .unwrap());
        assert!(ledger
            .has_sufficient_credits("nobody@example.com", Credits::ZERO)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_has_sufficient_credits_rejects_negative_cost() {
        let ledger = MemoryLedger::new();
        let result = ledger
            .has_sufficient_credits(ACCOUNT, Credits::from_millis(-1))
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_reserve_unknown_account_is_not_found() {
        let ledger = MemoryLedger::new();
        let result = ledger.reserve("nobody@example.com", Credits::from_whole(1)).await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_reserve_rejects_non_positive_cost() {
        let ledger = MemoryLedger::new()
            .with_account(ACCOUNT, Credits::from_whole(1))
            .await;
        assert!(matches!(
            ledger.reserve(ACCOUNT, Credits::ZERO).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::from_whole(1));
    }

    #[tokio::test]
    async fn test_reserve_then_refund_restores_balance() {
        let ledger = MemoryLedger::new()
            .with_account(ACCOUNT, Credits::from_whole(3))
            .await;
        let cost = Credits::from_millis(500);

        let receipt = ledger.reserve(ACCOUNT, cost).await.unwrap();
        assert_eq!(receipt.balance, Credits::from_millis(2_500));

        let refund = ledger
            .refund(ACCOUNT, receipt.reservation_id, cost)
            .await
            .unwrap();
        assert!(refund.applied);
        assert_eq!(refund.balance, Credits::from_whole(3));
    }

    #[tokio::test]
    async fn test_second_refund_of_same_reservation_is_a_no_op() {
        let ledger = MemoryLedger::new()
            .with_account(ACCOUNT, Credits::from_whole(2))
            .await;
        let cost = Credits::from_whole(1);
        let receipt = ledger.reserve(ACCOUNT, cost).await.unwrap();

        ledger
            .refund(ACCOUNT, receipt.reservation_id, cost)
            .await
            .unwrap();
        let again = ledger
            .refund(ACCOUNT, receipt.reservation_id, cost)
            .await
            .unwrap();

        assert!(!again.applied);
        assert_eq!(again.balance, Credits::from_whole(2));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::from_whole(2));
        let refunds = ledger
            .history(ACCOUNT, 10)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[tokio::test]
    async fn test_refund_cannot_exceed_reserved_cost() {
        let ledger = MemoryLedger::new()
            .with_account(ACCOUNT, Credits::from_whole(1))
            .await;
        let receipt = ledger.reserve(ACCOUNT, Credits::from_millis(500)).await.unwrap();

        let result = ledger
            .refund(ACCOUNT, receipt.reservation_id, Credits::from_whole(1))
            .await;

        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::from_millis(500));
    }

    #[tokio::test]
    async fn test_zero_balance_reserve_fails_without_mutation() {
        let ledger = MemoryLedger::new().with_account(ACCOUNT, Credits::ZERO).await;

        let result = ledger.reserve(ACCOUNT, Credits::from_whole(1)).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientCredits { available, .. }) if available == Credits::ZERO
        ));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::ZERO);
        assert!(ledger.history(ACCOUNT, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_of_unknown_reservation_is_rejected() {
        let ledger = MemoryLedger::new()
            .with_account(ACCOUNT, Credits::from_whole(1))
            .await;
        let receipt = ledger.reserve(ACCOUNT, Credits::from_whole(1)).await.unwrap();

        let unknown = ledger
            .refund(ACCOUNT, Uuid::new_v4(), Credits::from_whole(1))
            .await;
        assert!(matches!(unknown, Err(LedgerError::ReservationNotFound(_))));

        // A reservation only refunds to the account it was taken from.
        let other_account = ledger
            .refund("nobody@example.com", receipt.reservation_id, Credits::from_whole(1))
            .await;
        assert!(matches!(other_account, Err(LedgerError::ReservationNotFound(_))));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::ZERO);
    }

    #[tokio::test]
    async fn test_grant_redelivery_applies_once() {
        let ledger = MemoryLedger::new();

        let first = ledger.grant(grant(100, "session-1")).await.unwrap();
        let second = ledger.grant(grant(100, "session-1")).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.balance, Credits::from_whole(100));
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::from_whole(100));
        assert_eq!(ledger.payments(ACCOUNT, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grant_records_payment_details() {
        let ledger = MemoryLedger::new();
        ledger.grant(grant(80, "session-1")).await.unwrap();
        ledger.grant(grant(250, "session-2")).await.unwrap();

        let payments = ledger.payments(ACCOUNT, 10).await.unwrap();

        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].session_id, "session-2");
        assert_eq!(payments[0].credits, Credits::from_whole(250));
        assert_eq!(payments[1].plan.as_deref(), Some("basic"));
        assert_eq!(payments[1].amount_minor, Some(999));
        assert_eq!(payments[1].currency.as_deref(), Some("eur"));
    }

    #[tokio::test]
    async fn test_distinct_sessions_both_apply() {
        let ledger = MemoryLedger::new();
        ledger.grant(grant(80, "session-1")).await.unwrap();
        let outcome = ledger.grant(grant(250, "session-2")).await.unwrap();
        assert_eq!(outcome.balance, Credits::from_whole(330));
    }

    #[tokio::test]
    async fn test_grant_rejects_non_positive_amount() {
        let ledger = MemoryLedger::new();
        let result = ledger.grant(grant(0, "session-1")).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        // A rejected grant must not burn the idempotency key.
        assert!(ledger.grant(grant(80, "session-1")).await.unwrap().applied);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let ledger = MemoryLedger::new();
        ledger.grant(grant(2, "session-1")).await.unwrap();
        let receipt = ledger.reserve(ACCOUNT, Credits::from_whole(1)).await.unwrap();
        ledger
            .refund(ACCOUNT, receipt.reservation_id, Credits::from_whole(1))
            .await
            .unwrap();

        let history = ledger.history(ACCOUNT, 2).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EntryKind::Refund);
        assert_eq!(history[1].kind, EntryKind::Reserve);
        assert_eq!(history[1].delta, -Credits::from_whole(1));
        assert_eq!(history[1].balance_after, Credits::from_whole(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserves_on_exact_balance_only_one_wins() {
        let cost = Credits::from_whole(1);
        let ledger = Arc::new(MemoryLedger::new().with_account(ACCOUNT, cost).await);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.reserve(ACCOUNT, cost).await })
            })
            .collect();

        let mut successes = 0;
        let mut rejections = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::InsufficientCredits { .. }) => rejections += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(rejections, 15);
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redelivery_applies_grant_once() {
        let ledger = Arc::new(MemoryLedger::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.grant(grant(100, "session-1")).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(ledger.get_balance(ACCOUNT).await.unwrap(), Credits::from_whole(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_balance_never_negative_under_mixed_load() {
        let ledger = Arc::new(MemoryLedger::new().with_account(ACCOUNT, Credits::from_whole(5)).await);
        let half = Credits::from_millis(500);

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    if let Ok(receipt) = ledger.reserve(ACCOUNT, half).await {
                        if i % 3 == 0 {
                            ledger
                                .refund(ACCOUNT, receipt.reservation_id, half)
                                .await
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let history = ledger.history(ACCOUNT, usize::MAX).await.unwrap();
        assert!(history.iter().all(|e| !e.balance_after.is_negative()));
        assert!(!ledger.get_balance(ACCOUNT).await.unwrap().is_negative());
    }
}
