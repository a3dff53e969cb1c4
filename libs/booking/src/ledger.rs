//! Escrow ledger
//!
//! Every balance mutation is a journal entry linked to the order event that
//! caused it. The store writes at most one entry of each kind per order, so
//! a retried release or refund is a no-op instead of a double payment.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AccountSettings;
use crate::crypto;
use crate::error::{BookingError, BookingResult, Resource};
use crate::models::{
    Account, AccountRole, EntryKind, LedgerEntry, Order, OrderId, OrderMovements, OrderState,
    UserId,
};
use crate::repositories::{AccountStore, EntryOutcome};

/// Share of the cost paid to the photographer once the meeting is verified
pub const MEETING_TRANCHE_PERCENT: i64 = 30;

/// First tranche, rounded down to the smallest currency unit
///
/// Split into whole hundreds and remainder so large costs cannot overflow.
pub fn meeting_tranche(cost: i64) -> i64 {
    (cost / 100) * MEETING_TRANCHE_PERCENT + (cost % 100) * MEETING_TRANCHE_PERCENT / 100
}

/// Second tranche; together with [`meeting_tranche`] always sums to `cost`
pub fn final_tranche(cost: i64) -> i64 {
    cost - meeting_tranche(cost)
}

/// Amount returned to the client when an order in `state` is cancelled
pub fn cancellation_refund(cost: i64, state: OrderState) -> i64 {
    if state.meeting_tranche_released() {
        final_tranche(cost)
    } else {
        cost
    }
}

/// Which photographer payout a release belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tranche {
    Meeting,
    Final,
}

impl Tranche {
    fn entry_kind(self) -> EntryKind {
        match self {
            Tranche::Meeting => EntryKind::MeetingRelease,
            Tranche::Final => EntryKind::FinalRelease,
        }
    }
}

/// Outcome of checking one order's journal against its lifecycle state
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub order_id: OrderId,
    pub cost: i64,
    pub state: OrderState,
    pub movements: OrderMovements,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Escrow ledger over an [`AccountStore`]
#[derive(Clone)]
pub struct EscrowLedger {
    accounts: Arc<dyn AccountStore>,
    settings: AccountSettings,
}

impl EscrowLedger {
    pub fn new(accounts: Arc<dyn AccountStore>, settings: AccountSettings) -> Self {
        Self { accounts, settings }
    }

    /// Create a balance row with the role's opening balance and issue the
    /// account's persistent secret
    pub async fn open_account(
        &self,
        owner_id: UserId,
        role: AccountRole,
    ) -> BookingResult<Account> {
        let balance = match role {
            AccountRole::Client => self.settings.client_opening_balance,
            AccountRole::Photographer => self.settings.photographer_opening_balance,
        };

        let account = Account {
            owner_id,
            role,
            balance,
            persistent_secret: crypto::generate_persistent_secret(),
            created_at: Utc::now(),
        };
        self.accounts.create(&account).await?;

        info!("Opened {} account {}", role.as_str(), owner_id);
        Ok(account)
    }

    /// Read-only balance query
    pub async fn balance_of(&self, owner_id: UserId) -> BookingResult<i64> {
        Ok(self.account(owner_id).await?.balance)
    }

    pub(crate) async fn account(&self, owner_id: UserId) -> BookingResult<Account> {
        self.find_account(owner_id)
            .await?
            .ok_or(BookingError::NotFound(Resource::Account(owner_id)))
    }

    pub(crate) async fn find_account(&self, owner_id: UserId) -> BookingResult<Option<Account>> {
        Ok(self.accounts.find(owner_id).await?)
    }

    /// Withdraw `amount` from the client into escrow for `order_id`
    pub async fn reserve(
        &self,
        order_id: OrderId,
        client_id: UserId,
        amount: i64,
    ) -> BookingResult<i64> {
        self.write(order_id, client_id, EntryKind::Reserve, amount)
            .await
    }

    /// Pay a tranche of the escrow to the photographer
    pub async fn release_to_photographer(
        &self,
        order_id: OrderId,
        photographer_id: UserId,
        tranche: Tranche,
        amount: i64,
    ) -> BookingResult<i64> {
        self.write(order_id, photographer_id, tranche.entry_kind(), amount)
            .await
    }

    /// Return escrow to the client on cancellation
    pub async fn refund_client(
        &self,
        order_id: OrderId,
        client_id: UserId,
        amount: i64,
    ) -> BookingResult<i64> {
        self.write(order_id, client_id, EntryKind::Refund, amount)
            .await
    }

    /// Undo a reservation whose order row was never created
    pub(crate) async fn compensate_reservation(
        &self,
        order_id: OrderId,
        client_id: UserId,
        amount: i64,
    ) -> BookingResult<i64> {
        self.write(order_id, client_id, EntryKind::Compensation, amount)
            .await
    }

    /// Escrow totals for an order
    pub async fn movements(&self, order_id: OrderId) -> BookingResult<OrderMovements> {
        let entries = self.accounts.entries_for_order(order_id).await?;
        Ok(OrderMovements::from_entries(&entries))
    }

    /// Check that the journal matches what the order's state says was paid
    pub async fn audit(&self, order: &Order) -> BookingResult<AuditReport> {
        let movements = self.movements(order.id).await?;
        let mut violations = Vec::new();

        if movements.reserved != order.cost {
            violations.push(format!(
                "reserved {} but order costs {}",
                movements.reserved, order.cost
            ));
        }
        if movements.compensated != 0 {
            violations.push(format!(
                "reservation compensated by {} on a created order",
                movements.compensated
            ));
        }

        let expected_meeting = if order.state.meeting_tranche_released() {
            meeting_tranche(order.cost)
        } else {
            0
        };
        let paid_out = movements.released_to_photographer + movements.refunded_to_client;

        if order.state == OrderState::Finish {
            if !movements.is_settled() {
                violations.push(format!(
                    "{} still held after finish: released {} + refunded {} of reserved {}",
                    movements.held(),
                    movements.released_to_photographer,
                    movements.refunded_to_client,
                    movements.reserved
                ));
            }
        } else if paid_out != expected_meeting {
            violations.push(format!(
                "{} paid out while order is {}, expected {}",
                paid_out, order.state, expected_meeting
            ));
        }

        if movements.released_to_photographer > order.cost {
            violations.push(format!(
                "photographer received {} on a cost of {}",
                movements.released_to_photographer, order.cost
            ));
        }

        if !violations.is_empty() {
            error!(
                "Escrow audit failed for order {}: {}",
                order.id,
                violations.join("; ")
            );
        }

        Ok(AuditReport {
            order_id: order.id,
            cost: order.cost,
            state: order.state,
            movements,
            violations,
        })
    }

    /// Journal `amount` as a debit for reservations and a credit otherwise
    async fn write(
        &self,
        order_id: OrderId,
        owner_id: UserId,
        kind: EntryKind,
        amount: i64,
    ) -> BookingResult<i64> {
        if amount < 0 {
            return Err(BookingError::InvalidOrder(format!(
                "{kind} amount must not be negative"
            )));
        }
        let delta = if kind == EntryKind::Reserve {
            -amount
        } else {
            amount
        };

        let entry = LedgerEntry::new(order_id, owner_id, kind, delta);
        match self.accounts.apply_entry(&entry).await? {
            EntryOutcome::Applied { balance } => {
                info!(
                    "Ledger {} of {} on account {} for order {}",
                    kind, amount, owner_id, order_id
                );
                Ok(balance)
            }
            EntryOutcome::Replayed => {
                warn!(
                    "Ledger {} for order {} already recorded, not applied again",
                    kind, order_id
                );
                self.balance_of(owner_id).await
            }
            EntryOutcome::Insufficient { available } => Err(BookingError::InsufficientFunds {
                requested: amount,
                available,
            }),
            EntryOutcome::MissingAccount => {
                Err(BookingError::NotFound(Resource::Account(owner_id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryAccountStore;
    use uuid::Uuid;

    fn ledger() -> EscrowLedger {
        EscrowLedger::new(
            Arc::new(MemoryAccountStore::new()),
            AccountSettings::default(),
        )
    }

    #[test]
    fn tranches_always_sum_to_cost() {
        for cost in [1, 3, 99, 100, 101, 333, 1000, 1001, 123_456_789, i64::MAX] {
            assert_eq!(meeting_tranche(cost) + final_tranche(cost), cost);
            assert!(meeting_tranche(cost) <= cost);
        }
        assert_eq!(meeting_tranche(1000), 300);
        assert_eq!(meeting_tranche(1001), 300);
        assert_eq!(meeting_tranche(333), 99);
    }

    #[test]
    fn refund_depends_on_state() {
        assert_eq!(cancellation_refund(1000, OrderState::Created), 1000);
        assert_eq!(cancellation_refund(1000, OrderState::AgreedPhotographer), 1000);
        assert_eq!(cancellation_refund(1000, OrderState::AgreedClient), 1000);
        assert_eq!(cancellation_refund(1000, OrderState::Meeting), 700);
        assert_eq!(cancellation_refund(1000, OrderState::WatermarkSent), 700);
    }

    #[tokio::test]
    async fn reserve_debits_client() -> BookingResult<()> {
        let ledger = ledger();
        let client = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;

        let balance = ledger.reserve(Uuid::new_v4(), client, 400).await?;
        assert_eq!(balance, 600);
        assert_eq!(ledger.balance_of(client).await?, 600);
        Ok(())
    }

    #[tokio::test]
    async fn reserve_beyond_balance_is_rejected() -> BookingResult<()> {
        let ledger = ledger();
        let client = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;

        let result = ledger.reserve(Uuid::new_v4(), client, 1001).await;
        assert!(matches!(
            result,
            Err(BookingError::InsufficientFunds {
                requested: 1001,
                available: 1000
            })
        ));
        assert_eq!(ledger.balance_of(client).await?, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_reserves_cannot_overdraw() -> BookingResult<()> {
        let ledger = ledger();
        let client = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;

        let (a, b) = tokio::join!(
            ledger.reserve(Uuid::new_v4(), client, 700),
            ledger.reserve(Uuid::new_v4(), client, 700),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(ledger.balance_of(client).await?, 300);
        Ok(())
    }

    #[tokio::test]
    async fn replayed_release_pays_once() -> BookingResult<()> {
        let ledger = ledger();
        let photographer = Uuid::new_v4();
        ledger
            .open_account(photographer, AccountRole::Photographer)
            .await?;
        let order_id = Uuid::new_v4();

        ledger
            .release_to_photographer(order_id, photographer, Tranche::Meeting, 300)
            .await?;
        let balance = ledger
            .release_to_photographer(order_id, photographer, Tranche::Meeting, 300)
            .await?;
        assert_eq!(balance, 300);
        Ok(())
    }

    #[tokio::test]
    async fn negative_credit_is_rejected() -> BookingResult<()> {
        let ledger = ledger();
        let client = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;

        let result = ledger.refund_client(Uuid::new_v4(), client, -10).await;
        assert!(matches!(result, Err(BookingError::InvalidOrder(_))));
        Ok(())
    }

    #[tokio::test]
    async fn extreme_amounts_are_rejected_without_moving_money() -> BookingResult<()> {
        let ledger = ledger();
        let client = Uuid::new_v4();
        let photographer = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;
        ledger
            .open_account(photographer, AccountRole::Photographer)
            .await?;
        let order = Uuid::new_v4();

        let reserve = ledger.reserve(order, client, i64::MIN).await;
        assert!(matches!(reserve, Err(BookingError::InvalidOrder(_))));

        let release = ledger
            .release_to_photographer(order, photographer, Tranche::Meeting, i64::MIN)
            .await;
        assert!(matches!(release, Err(BookingError::InvalidOrder(_))));

        let refund = ledger.refund_client(order, client, i64::MIN).await;
        assert!(matches!(refund, Err(BookingError::InvalidOrder(_))));

        let overflow = ledger.refund_client(order, client, i64::MAX).await;
        assert!(matches!(overflow, Err(BookingError::Database(_))));

        assert_eq!(ledger.balance_of(client).await?, 1000);
        assert_eq!(ledger.balance_of(photographer).await?, 0);
        assert!(ledger.movements(order).await?.is_settled());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let ledger = ledger();
        let owner = Uuid::new_v4();
        let result = ledger.balance_of(owner).await;
        assert!(matches!(
            result,
            Err(BookingError::NotFound(Resource::Account(id))) if id == owner
        ));
    }
}
