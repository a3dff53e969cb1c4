//! Booking domain models

pub mod account;
pub mod order;

// Re-export for convenience
pub use account::{Account, AccountRole, EntryKind, LedgerEntry, OrderMovements};
pub use order::{Location, NewOrder, Order, OrderChange, OrderId, OrderState, UserId};
