//! Postgres-backed credit ledger.
//!
//! `reserve` locks the account row with `SELECT ... FOR UPDATE` inside a transaction,
//! so concurrent reservations for the same account serialize on the row lock.
//! `grant` and `refund` rely on the primary keys of `credit_grants` and `credit_refunds`
//! for at-most-once application: a concurrent duplicate blocks on the unique index and
//! then inserts nothing.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::credits::ledger::{
    require_positive, CreditLedger, EntryKind, GrantOutcome, GrantParams, LedgerEntry,
    LedgerError, PaymentRecord, RefundOutcome, ReserveReceipt,
};
use crate::credits::Credits;
use crate::models::credits::{CreditAccountRow, CreditEntryRow, CreditGrantRow};

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Appends an audit row on the caller's transaction and returns its id.
async fn insert_entry(
    conn: &mut PgConnection,
    account_id: &str,
    kind: EntryKind,
    delta: Credits,
    balance_after: Credits,
    reference: Option<&str>,
) -> Result<Uuid, LedgerError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO credit_entries
            (id, account_id, kind, delta_millis, balance_after_millis, reference)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(account_id)
    .bind(kind.as_str())
    .bind(delta.millis())
    .bind(balance_after.millis())
    .bind(reference)
    .execute(conn)
    .await?;
    Ok(id)
}

async fn fetch_balance(
    conn: &mut PgConnection,
    account_id: &str,
) -> Result<Option<Credits>, LedgerError> {
    let millis = sqlx::query_scalar::<_, i64>(
        "SELECT balance_millis FROM credit_accounts WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_optional(conn)
    .await?;
    Ok(millis.map(Credits::from_millis))
}

#[async_trait]
impl CreditLedger for PgLedger {
    async fn open_account(&self, account_id: &str) -> Result<Credits, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO credit_accounts (account_id) VALUES ($1) ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let balance = fetch_balance(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        tx.commit().await?;

        if inserted > 0 {
            info!("Opened credit account for {account_id}");
        }
        Ok(balance)
    }

    async fn get_balance(&self, account_id: &str) -> Result<Credits, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_balance(&mut conn, account_id)
            .await?
            .unwrap_or(Credits::ZERO))
    }

    async fn reserve(
        &self,
        account_id: &str,
        cost: Credits,
    ) -> Result<ReserveReceipt, LedgerError> {
        require_positive(cost)?;
        let mut tx = self.pool.begin().await?;

        let account = sqlx::query_as::<_, CreditAccountRow>(
            "SELECT * FROM credit_accounts WHERE account_id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let available = Credits::from_millis(account.balance_millis);
        if available < cost {
            debug!("Reserve of {cost} rejected for {account_id}: balance {available}");
            // Dropping the transaction rolls back and releases the row lock.
            return Err(LedgerError::InsufficientCredits {
                required: cost,
                available,
            });
        }

        let balance = available
            .checked_sub(cost)
            .ok_or_else(|| LedgerError::Overflow(account_id.to_string()))?;

        sqlx::query(
            "UPDATE credit_accounts SET balance_millis = $2, updated_at = now() WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(balance.millis())
        .execute(&mut *tx)
        .await?;

        let reservation_id =
            insert_entry(&mut tx, account_id, EntryKind::Reserve, -cost, balance, None).await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        let reserved = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT -delta_millis FROM credit_entries
            WHERE id = $1 AND account_id = $2 AND kind = 'reserve'
            "#,
        )
        .bind(reservation_id)
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Credits::from_millis)
        .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        if amount > reserved {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let recorded = sqlx::query(
            r#"
            INSERT INTO credit_refunds (reservation_id, account_id, credits_millis)
            VALUES ($1, $2, $3)
            ON CONFLICT (reservation_id) DO NOTHING
            "#,
        )
        .bind(reservation_id)
        .bind(account_id)
        .bind(amount.millis())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 0 {
            let balance = fetch_balance(&mut tx, account_id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
            tx.commit().await?;
            info!("Reservation {reservation_id} already refunded, balance for {account_id} unchanged");
            return Ok(RefundOutcome {
                balance,
                applied: false,
            });
        }

        let millis = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE credit_accounts
            SET balance_millis = balance_millis + $2, updated_at = now()
            WHERE account_id = $1
            RETURNING balance_millis
            "#,
        )
        .bind(account_id)
        .bind(amount.millis())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        let balance = Credits::from_millis(millis);

        let reference = reservation_id.to_string();
        insert_entry(
            &mut tx,
            account_id,
            EntryKind::Refund,
            amount,
            balance,
            Some(&reference),
        )
        .await?;
        tx.commit().await?;

        info!("Refunded {amount} credits to {account_id} ({reservation_id}), balance now {balance}");
        Ok(RefundOutcome {
            balance,
            applied: true,
        })
    }

    async fn grant(&self, params: GrantParams<'_>) -> Result<GrantOutcome, LedgerError> {
        let GrantParams {
            account_id,
            credits,
            idempotency_key,
            plan,
            amount_minor,
            currency,
        } = params;
        require_positive(credits)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO credit_accounts (account_id) VALUES ($1) ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO credit_grants
                (idempotency_key, account_id, credits_millis, plan, amount_minor, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(account_id)
        .bind(credits.millis())
        .bind(plan)
        .bind(amount_minor)
        .bind(currency)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 0 {
            let balance = fetch_balance(&mut tx, account_id)
                .await?
                .unwrap_or(Credits::ZERO);
            tx.commit().await?;
            info!("Grant {idempotency_key} already applied, balance for {account_id} unchanged");
            return Ok(GrantOutcome {
                balance,
                applied: false,
            });
        }

        let millis = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE credit_accounts
            SET balance_millis = balance_millis + $2, updated_at = now()
            WHERE account_id = $1
            RETURNING balance_millis
            "#,
        )
        .bind(account_id)
        .bind(credits.millis())
        .fetch_one(&mut *tx)
        .await?;
        let new_balance = Credits::from_millis(millis);

        insert_entry(
            &mut tx,
            account_id,
            EntryKind::Grant,
            credits,
            new_balance,
            Some(idempotency_key),
        )
        .await?;
        tx.commit().await?;

        info!("Granted {credits} credits to {account_id} (plan {plan:?}), balance now {new_balance}");
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
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, CreditEntryRow>(
            r#"
            SELECT * FROM credit_entries
            WHERE account_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn payments(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, CreditGrantRow>(
            r#"
            SELECT idempotency_key, account_id, credits_millis, plan, amount_minor, currency, created_at
            FROM credit_grants
            WHERE account_id = $1
            ORDER BY created_at DESC, idempotency_key
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PaymentRecord::from).collect())
    }
}
