//! Account balance and ledger journal models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::order::{OrderId, UserId};

/// Which side of a booking an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Client,
    Photographer,
}

impl AccountRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Client => "client",
            AccountRole::Photographer => "photographer",
        }
    }
}

impl FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(AccountRole::Client),
            "photographer" => Ok(AccountRole::Photographer),
            other => Err(format!("unknown account role: {other}")),
        }
    }
}

/// Money-relevant projection of a user
#[derive(Clone, Serialize)]
pub struct Account {
    pub owner_id: UserId,
    pub role: AccountRole,
    pub balance: i64,
    /// Issued once at account creation and never sent to clients
    #[serde(skip_serializing)]
    pub persistent_secret: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("owner_id", &self.owner_id)
            .field("role", &self.role)
            .field("balance", &self.balance)
            .field("persistent_secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Reason a ledger entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Client funds withdrawn into escrow at order creation
    Reserve,
    /// Reservation returned because the order row was never created
    Compensation,
    /// First tranche paid to the photographer at the verified meeting
    MeetingRelease,
    /// Remaining escrow paid to the photographer at finish
    FinalRelease,
    /// Escrow returned to the client on cancellation
    Refund,
}

impl EntryKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Reserve => "reserve",
            EntryKind::Compensation => "compensation",
            EntryKind::MeetingRelease => "meeting_release",
            EntryKind::FinalRelease => "final_release",
            EntryKind::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve" => Ok(EntryKind::Reserve),
            "compensation" => Ok(EntryKind::Compensation),
            "meeting_release" => Ok(EntryKind::MeetingRelease),
            "final_release" => Ok(EntryKind::FinalRelease),
            "refund" => Ok(EntryKind::Refund),
            other => Err(format!("unknown ledger entry kind: {other}")),
        }
    }
}

/// One signed balance mutation, linked to the order event that caused it
///
/// At most one entry of each kind exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub order_id: OrderId,
    pub owner_id: UserId,
    pub kind: EntryKind,
    /// Negative for debits, positive for credits
    pub delta: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(order_id: OrderId, owner_id: UserId, kind: EntryKind, delta: i64) -> Self {
        Self {
            order_id,
            owner_id,
            kind,
            delta,
            created_at: Utc::now(),
        }
    }
}

/// Escrow totals for one order, summed from its journal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderMovements {
    pub reserved: i64,
    pub compensated: i64,
    pub released_to_photographer: i64,
    pub refunded_to_client: i64,
}

impl OrderMovements {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries
            .into_iter()
            .fold(Self::default(), |mut totals, entry| {
                match entry.kind {
                    EntryKind::Reserve => totals.reserved += -entry.delta,
                    EntryKind::Compensation => totals.compensated += entry.delta,
                    EntryKind::MeetingRelease | EntryKind::FinalRelease => {
                        totals.released_to_photographer += entry.delta
                    }
                    EntryKind::Refund => totals.refunded_to_client += entry.delta,
                }
                totals
            })
    }

    /// Funds still held in escrow for the order
    pub fn held(&self) -> i64 {
        self.reserved - self.compensated - self.released_to_photographer - self.refunded_to_client
    }

    /// Everything reserved has left escrow, and nothing more than that
    pub fn is_settled(&self) -> bool {
        self.held() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn movements_sum_by_kind() {
        let order = Uuid::new_v4();
        let client = Uuid::new_v4();
        let photographer = Uuid::new_v4();
        let entries = [
            LedgerEntry::new(order, client, EntryKind::Reserve, -1000),
            LedgerEntry::new(order, photographer, EntryKind::MeetingRelease, 300),
            LedgerEntry::new(order, client, EntryKind::Refund, 700),
        ];

        let movements = OrderMovements::from_entries(&entries);
        assert_eq!(movements.reserved, 1000);
        assert_eq!(movements.released_to_photographer, 300);
        assert_eq!(movements.refunded_to_client, 700);
        assert!(movements.is_settled());
    }

    #[test]
    fn held_funds_are_not_settled() {
        let order = Uuid::new_v4();
        let entries = [LedgerEntry::new(
            order,
            Uuid::new_v4(),
            EntryKind::Reserve,
            -500,
        )];

        let movements = OrderMovements::from_entries(&entries);
        assert_eq!(movements.held(), 500);
        assert!(!movements.is_settled());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let account = Account {
            owner_id: Uuid::new_v4(),
            role: AccountRole::Client,
            balance: 10,
            persistent_secret: "deadbeef".to_string(),
            created_at: Utc::now(),
        };
        assert!(!format!("{account:?}").contains("deadbeef"));
    }
}
