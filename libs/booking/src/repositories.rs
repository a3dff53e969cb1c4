//! Storage seams for the booking core
//!
//! Each trait has a PostgreSQL implementation in [`postgres`] and an
//! in-process one in [`memory`]. Every read-then-write in the core goes
//! through one of the conditional operations below; none of them is a
//! two-round-trip read-modify-write.

use async_trait::async_trait;
use common::error::DatabaseResult;

use crate::models::{Account, LedgerEntry, Order, OrderChange, OrderId, OrderState, UserId};

pub mod memory;
pub mod postgres;

/// Order rows
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a freshly created order
    async fn insert(&self, order: &Order) -> DatabaseResult<()>;

    /// Find an order by ID
    async fn find(&self, id: OrderId) -> DatabaseResult<Option<Order>>;

    /// All orders currently in one of `states`, oldest first
    async fn list_by_states(&self, states: &[OrderState]) -> DatabaseResult<Vec<Order>>;

    /// Move the order from `expected` to `next` and apply `change` in one
    /// conditional update. Returns `false` when no row matched, which means
    /// the order is missing or another caller transitioned it first.
    async fn apply(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
        change: &OrderChange,
    ) -> DatabaseResult<bool>;
}

/// Result of writing one ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Journal row written and balance updated
    Applied { balance: i64 },
    /// An entry of the same kind already exists for the order; nothing changed
    Replayed,
    /// The debit would take the balance below zero; nothing changed
    Insufficient { available: i64 },
    /// No account for the entry's owner; nothing changed
    MissingAccount,
}

/// Account balances and the ledger journal
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an account row
    async fn create(&self, account: &Account) -> DatabaseResult<()>;

    /// Find an account by owner ID
    async fn find(&self, owner_id: UserId) -> DatabaseResult<Option<Account>>;

    /// Write the journal entry and move the balance in one transaction
    /// scoped to the owner's row
    async fn apply_entry(&self, entry: &LedgerEntry) -> DatabaseResult<EntryOutcome>;

    /// Journal entries linked to an order, oldest first
    async fn entries_for_order(&self, order_id: OrderId) -> DatabaseResult<Vec<LedgerEntry>>;
}

/// Photographers who selected an order and await the client's decision
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Record a candidate; returns `false` if already recorded
    async fn add(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool>;

    async fn contains(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool>;

    /// Remove one candidate; returns `false` if it was not recorded
    async fn remove(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool>;

    /// Remove every candidate of an order
    async fn clear(&self, order_id: OrderId) -> DatabaseResult<u64>;

    async fn list(&self, order_id: OrderId) -> DatabaseResult<Vec<UserId>>;
}
