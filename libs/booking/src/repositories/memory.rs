//! In-process stores
//!
//! Each store keeps its rows behind a single async mutex, so every trait
//! method is atomic with respect to the others.

use async_trait::async_trait;
use chrono::Utc;
use common::error::{DatabaseError, DatabaseResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{AccountStore, CandidateStore, EntryOutcome, OrderStore};
use crate::models::{
    Account, EntryKind, LedgerEntry, Order, OrderChange, OrderId, OrderState, UserId,
};

/// Orders held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
    orders: Arc<Mutex<HashMap<OrderId, Order>>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> DatabaseResult<()> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.id) {
            return Err(DatabaseError::Integrity(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find(&self, id: OrderId) -> DatabaseResult<Option<Order>> {
        Ok(self.orders.lock().await.get(&id).cloned())
    }

    async fn list_by_states(&self, states: &[OrderState]) -> DatabaseResult<Vec<Order>> {
        let orders = self.orders.lock().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|order| states.contains(&order.state))
            .cloned()
            .collect();
        matching.sort_by_key(|order| order.created_at);
        Ok(matching)
    }

    async fn apply(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
        change: &OrderChange,
    ) -> DatabaseResult<bool> {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(&id) {
            Some(order) if order.state == expected => {
                change.apply_to(order);
                order.state = next;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
struct AccountBook {
    accounts: HashMap<UserId, Account>,
    journal: Vec<LedgerEntry>,
    written: HashSet<(OrderId, EntryKind)>,
}

/// Accounts and ledger journal held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountStore {
    book: Arc<Mutex<AccountBook>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, account: &Account) -> DatabaseResult<()> {
        let mut book = self.book.lock().await;
        if book.accounts.contains_key(&account.owner_id) {
            return Err(DatabaseError::Integrity(format!(
                "account {} already exists",
                account.owner_id
            )));
        }
        book.accounts.insert(account.owner_id, account.clone());
        Ok(())
    }

    async fn find(&self, owner_id: UserId) -> DatabaseResult<Option<Account>> {
        Ok(self.book.lock().await.accounts.get(&owner_id).cloned())
    }

    async fn apply_entry(&self, entry: &LedgerEntry) -> DatabaseResult<EntryOutcome> {
        let mut book = self.book.lock().await;
        if book.written.contains(&(entry.order_id, entry.kind)) {
            return Ok(EntryOutcome::Replayed);
        }

        let Some(account) = book.accounts.get_mut(&entry.owner_id) else {
            return Ok(EntryOutcome::MissingAccount);
        };

        let Some(balance) = account.balance.checked_add(entry.delta) else {
            return Err(DatabaseError::Integrity(format!(
                "balance of account {} out of range",
                entry.owner_id
            )));
        };
        if balance < 0 {
            return Ok(EntryOutcome::Insufficient {
                available: account.balance,
            });
        }
        account.balance = balance;

        book.written.insert((entry.order_id, entry.kind));
        book.journal.push(entry.clone());
        Ok(EntryOutcome::Applied { balance })
    }

    async fn entries_for_order(&self, order_id: OrderId) -> DatabaseResult<Vec<LedgerEntry>> {
        let book = self.book.lock().await;
        Ok(book
            .journal
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .cloned()
            .collect())
    }
}

/// Candidate photographers held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCandidateStore {
    candidates: Arc<Mutex<HashMap<OrderId, BTreeSet<UserId>>>>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn add(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let mut candidates = self.candidates.lock().await;
        Ok(candidates
            .entry(order_id)
            .or_default()
            .insert(photographer_id))
    }

    async fn contains(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let candidates = self.candidates.lock().await;
        Ok(candidates
            .get(&order_id)
            .is_some_and(|set| set.contains(&photographer_id)))
    }

    async fn remove(&self, order_id: OrderId, photographer_id: UserId) -> DatabaseResult<bool> {
        let mut candidates = self.candidates.lock().await;
        Ok(candidates
            .get_mut(&order_id)
            .is_some_and(|set| set.remove(&photographer_id)))
    }

    async fn clear(&self, order_id: OrderId) -> DatabaseResult<u64> {
        let mut candidates = self.candidates.lock().await;
        Ok(candidates
            .remove(&order_id)
            .map_or(0, |set| set.len() as u64))
    }

    async fn list(&self, order_id: OrderId) -> DatabaseResult<Vec<UserId>> {
        let candidates = self.candidates.lock().await;
        Ok(candidates
            .get(&order_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}
