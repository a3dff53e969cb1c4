//! Order model and the lifecycle states it moves through

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of an order
pub type OrderId = Uuid;

/// Identifier of a client or photographer account
pub type UserId = Uuid;

/// Longest comment a client may attach to an order
pub const MAX_COMMENT_LEN: usize = 1000;

/// Geographic point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the WGS84 coordinate range
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Lifecycle state of an order
///
/// `Finish` is terminal. Every other state can reach it through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    AgreedPhotographer,
    AgreedClient,
    Meeting,
    WatermarkSent,
    Finish,
}

impl OrderState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::AgreedPhotographer => "agreed_photographer",
            OrderState::AgreedClient => "agreed_client",
            OrderState::Meeting => "meeting",
            OrderState::WatermarkSent => "watermarks_sent",
            OrderState::Finish => "finish",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Finish)
    }

    /// Whether the meeting tranche has already been paid out in this state
    pub const fn meeting_tranche_released(&self) -> bool {
        matches!(
            self,
            OrderState::Meeting | OrderState::WatermarkSent | OrderState::Finish
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderState::Created),
            "agreed_photographer" => Ok(OrderState::AgreedPhotographer),
            "agreed_client" => Ok(OrderState::AgreedClient),
            "meeting" => Ok(OrderState::Meeting),
            "watermarks_sent" => Ok(OrderState::WatermarkSent),
            "finish" => Ok(OrderState::Finish),
            other => Err(format!("unknown order state: {other}")),
        }
    }
}

/// Order entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_id: UserId,
    pub photographer_id: Option<UserId>,
    pub cost: i64,
    pub requested_location: Location,
    pub client_current_location: Option<Location>,
    pub comment: String,
    pub state: OrderState,
    pub original_asset_ref: Option<String>,
    pub watermarked_asset_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New order creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub client_id: UserId,
    pub cost: i64,
    pub location: Location,
    #[serde(default)]
    pub comment: String,
}

impl NewOrder {
    /// Check the payload before any money moves
    pub fn validate(&self) -> Result<(), String> {
        if self.cost <= 0 {
            return Err("Order cost must be positive".to_string());
        }

        if !self.location.is_valid() {
            return Err("Order location is out of range".to_string());
        }

        if self.comment.chars().count() > MAX_COMMENT_LEN {
            return Err(format!(
                "Comment must be at most {MAX_COMMENT_LEN} characters long"
            ));
        }

        Ok(())
    }

    /// Build the row that will be inserted in `Created`
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        Order {
            id,
            client_id: self.client_id,
            photographer_id: None,
            cost: self.cost,
            requested_location: self.location,
            client_current_location: None,
            comment: self.comment,
            state: OrderState::Created,
            original_asset_ref: None,
            watermarked_asset_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Column updates applied together with a conditional state change
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderChange {
    pub photographer_id: Option<UserId>,
    pub client_current_location: Option<Location>,
    pub original_asset_ref: Option<String>,
    pub watermarked_asset_ref: Option<String>,
}

impl OrderChange {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn assign_photographer(photographer_id: UserId) -> Self {
        Self {
            photographer_id: Some(photographer_id),
            ..Self::default()
        }
    }

    pub fn client_location(location: Location) -> Self {
        Self {
            client_current_location: Some(location),
            ..Self::default()
        }
    }

    pub fn assets(original: String, watermarked: String) -> Self {
        Self {
            original_asset_ref: Some(original),
            watermarked_asset_ref: Some(watermarked),
            ..Self::default()
        }
    }

    /// Apply the change to an in-memory copy of the row
    pub fn apply_to(&self, order: &mut Order) {
        if let Some(photographer_id) = self.photographer_id {
            order.photographer_id = Some(photographer_id);
        }
        if let Some(location) = self.client_current_location {
            order.client_current_location = Some(location);
        }
        if let Some(original) = &self.original_asset_ref {
            order.original_asset_ref = Some(original.clone());
        }
        if let Some(watermarked) = &self.watermarked_asset_ref {
            order.watermarked_asset_ref = Some(watermarked.clone());
        }
    }
}
