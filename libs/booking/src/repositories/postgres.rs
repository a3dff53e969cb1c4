//! PostgreSQL stores
//!
//! Table layout lives in `schema.sql` at the crate root.

use async_trait::async_trait;
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{AccountStore, CandidateStore, EntryOutcome, OrderStore};
use crate::models::{
    Account, LedgerEntry, Location, Order, OrderChange, OrderId, OrderState, UserId,
};

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> DatabaseResult<T> {
    value.parse().map_err(DatabaseError::Integrity)
}

fn order_from_row(row: &PgRow) -> DatabaseResult<Order> {
    let client_latitude: Option<f64> = row.try_get("client_latitude")?;
    let client_longitude: Option<f64> = row.try_get("client_longitude")?;
    let state: String = row.try_get("state")?;

    Ok(Order {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        photographer_id: row.try_get("photographer_id")?,
        cost: row.try_get("cost")?,
        requested_location: Location::new(
            row.try_get("requested_latitude")?,
            row.try_get("requested_longitude")?,
        ),
        client_current_location: client_latitude
            .zip(client_longitude)
            .map(|(latitude, longitude)| Location::new(latitude, longitude)),
        comment: row.try_get("comment")?,
        state: parse_column(&state)?,
        original_asset_ref: row.try_get("original_asset_ref")?,
        watermarked_asset_ref: row.try_get("watermarked_asset_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Order repository for database operations
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, client_id, cost, requested_latitude, requested_longitude,
                                comment, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id)
        .bind(order.client_id)
        .bind(order.cost)
        .bind(order.requested_location.latitude)
        .bind(order.requested_location.longitude)
        .bind(&order.comment)
        .bind(order.state.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: OrderId) -> DatabaseResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, photographer_id, cost, requested_latitude, requested_longitude,
                   client_latitude, client_longitude, comment, state, original_asset_ref,
                   watermarked_asset_ref, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_by_states(&self, states: &[OrderState]) -> DatabaseResult<Vec<Order>> {
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, client_id, photographer_id, cost, requested_latitude, requested_longitude,
                   client_latitude, client_longitude, comment, state, original_asset_ref,
                   watermarked_asset_ref, created_at, updated_at
            FROM orders
            WHERE state = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(states)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn apply(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
        change: &OrderChange,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3,
                photographer_id = COALESCE($4, photographer_id),
                client_latitude = COALESCE($5, client_latitude),
                client_longitude = COALESCE($6, client_longitude),
                original_asset_ref = COALESCE($7, original_asset_ref),
                watermarked_asset_ref = COALESCE($8, watermarked_asset_ref),
                updated_at = NOW()
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(change.photographer_id)
        .bind(change.client_current_location.map(|l| l.latitude))
        .bind(change.client_current_location.map(|l| l.longitude))
        .bind(change.original_asset_ref.as_deref())
        .bind(change.watermarked_asset_ref.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Account and ledger repository for database operations
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, account: &Account) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (owner_id, role, balance, secret_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.owner_id)
        .bind(account.role.as_str())
        .bind(account.balance)
        .bind(&account.persistent_secret)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, owner_id: UserId) -> DatabaseResult<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, role, balance, secret_key, created_at
            FROM accounts
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let role: String = row.try_get("role")?;
                Ok(Some(Account {
                    owner_id: row.try_get("owner_id")?,
                    role: parse_column(&role)?,
                    balance: row.try_get("balance")?,
                    persistent_secret: row.try_get("secret_key")?,
                    created_at: row.try_get("created_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn apply_entry(&self, entry: &LedgerEntry) -> DatabaseResult<EntryOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_entries (order_id, owner_id, kind, delta, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id, kind) DO NOTHING
            "#,
        )
        .bind(entry.order_id)
        .bind(entry.owner_id)
        .bind(entry.kind.as_str())
        .bind(entry.delta)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(EntryOutcome::Replayed);
        }

        // Check and mutate in one statement; the row lock serialises
        // concurrent debits against the same account.
        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE owner_id = $1 AND balance + $2 >= 0
            RETURNING balance
            "#,
        )
        .bind(entry.owner_id)
        .bind(entry.delta)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = updated {
            let balance: i64 = row.try_get("balance")?;
            tx.commit().await?;
            return Ok(EntryOutcome::Applied { balance });
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE owner_id = $1")
                .bind(entry.owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        tx.rollback().await?;

        Ok(match available {
            Some(available) => EntryOutcome::Insufficient { available },
            None => EntryOutcome::MissingAccount,
        })
    }

    async fn entries_for_order(&self, order_id: OrderId) -> DatabaseResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, owner_id, kind, delta, created_at
            FROM ledger_entries
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                Ok(LedgerEntry {
                    order_id: row.try_get("order_id")?,
                    owner_id: row.try_get("owner_id")?,
                    kind: parse_column(&kind)?,
                    delta: row.try_get("delta")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// Candidate photographer repository for database operations
#[derive(Clone)]
pub struct PgCandidateStore {
    pool: PgPool,
}

impl PgCandidateStore {
    /// Create a new candidate repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateStore for PgCandidateStore {
    async fn add(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_candidates (order_id, photographer_id)
            VALUES ($1, $2)
            ON CONFLICT (order_id, photographer_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(photographer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn contains(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM order_candidates WHERE order_id = $1 AND photographer_id = $2
            )
            "#,
        )
        .bind(order_id)
        .bind(photographer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn remove(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "DELETE FROM order_candidates WHERE order_id = $1 AND photographer_id = $2",
        )
        .bind(order_id)
        .bind(photographer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, order_id: OrderId) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM order_candidates WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, order_id: OrderId) -> DatabaseResult<Vec<UserId>> {
        let ids: Vec<UserId> = sqlx::query_scalar(
            r#"
            SELECT photographer_id FROM order_candidates
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
