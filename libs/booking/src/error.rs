//! Error types for the booking core
//!
//! Every operation returns [`BookingResult`]. Callers map these variants to
//! their transport; nothing here assumes a status code or message format.

use common::error::{CacheError, DatabaseError};
use std::fmt;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::models::{OrderId, OrderState, UserId};

/// Lifecycle operation named in a rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Accept,
    RequestMeetingProof,
    ConfirmMeeting,
    UploadAssets,
    RevealPreview,
    Finish,
    Cancel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Select => "select",
            Operation::Accept => "accept",
            Operation::RequestMeetingProof => "request_meeting_proof",
            Operation::ConfirmMeeting => "confirm_meeting",
            Operation::UploadAssets => "upload_assets",
            Operation::RevealPreview => "reveal_preview",
            Operation::Finish => "finish",
            Operation::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Resource reported by [`BookingError::NotFound`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Order(OrderId),
    Account(UserId),
    Credential(String),
    Candidate { order_id: OrderId, photographer_id: UserId },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Order(id) => write!(f, "order {id}"),
            Resource::Account(id) => write!(f, "account {id}"),
            Resource::Credential(key) => write!(f, "credential {key}"),
            Resource::Candidate {
                order_id,
                photographer_id,
            } => write!(f, "candidate {photographer_id} for order {order_id}"),
        }
    }
}

fn list_states(states: &[OrderState]) -> String {
    states
        .iter()
        .map(OrderState::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Custom error type for the booking core
#[derive(Error, Debug)]
pub enum BookingError {
    /// The order is not in a state the operation accepts
    #[error(
        "{operation} rejected: order is {actual}, expected {}",
        list_states(.expected)
    )]
    PreconditionFailed {
        operation: Operation,
        expected: &'static [OrderState],
        actual: OrderState,
    },

    /// A reservation exceeded the client's balance
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    /// Order, account, credential or candidate absent
    #[error("Not found: {0}")]
    NotFound(Resource),

    /// The meeting proof did not verify
    #[error("Invalid meeting proof")]
    ChallengeInvalid,

    /// No live challenge exists for the order
    #[error("Meeting proof expired")]
    ChallengeExpired,

    /// A one-time code did not match
    #[error("Invalid one-time code")]
    InvalidCode,

    /// Order creation payload failed validation
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Preview or original requested before the photographer uploaded them
    #[error("Assets for order {0} are not ready yet")]
    AssetsNotReady(OrderId),

    /// A compensating ledger action failed after a partial mutation
    #[error("Consistency fault on order {order_id}: {detail}")]
    ConsistencyFault { order_id: OrderId, detail: String },

    /// Relational store failure
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(#[source] CacheError),

    /// Symmetric cipher failure while issuing a challenge
    #[error("Cipher error: {0}")]
    Cipher(#[from] CryptoError),
}

impl From<CacheError> for BookingError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Missing(key) => BookingError::NotFound(Resource::Credential(key)),
            other => BookingError::Cache(other),
        }
    }
}

impl BookingError {
    pub fn rejected(
        operation: Operation,
        expected: &'static [OrderState],
        actual: OrderState,
    ) -> Self {
        BookingError::PreconditionFailed {
            operation,
            expected,
            actual,
        }
    }

    /// Needs an operator; must never be retried automatically
    pub fn is_fatal(&self) -> bool {
        matches!(self, BookingError::ConsistencyFault { .. })
    }
}

/// Type alias for booking results
pub type BookingResult<T> = Result<T, BookingError>;
