//! Escrow-backed photo session booking core
//!
//! A client reserves the session cost when creating an order. Photographers
//! select open orders, the client accepts one, and the escrow is paid out in
//! two tranches: 30% once an encrypted in-person meeting challenge verifies,
//! the rest when the client finishes the order after seeing a watermarked
//! preview. Cancelling refunds whatever is still held.
//!
//! ```rust,no_run
//! use booking::{Backends, Broker, Settings};
//! use booking::models::{AccountRole, Location, NewOrder};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(Backends::in_memory(), &Settings::default());
//!     let client = Uuid::new_v4();
//!     broker.ledger().open_account(client, AccountRole::Client).await?;
//!
//!     let order = broker
//!         .orders()
//!         .create_order(NewOrder {
//!             client_id: client,
//!             cost: 500,
//!             location: Location::new(48.8566, 2.3522),
//!             comment: "Engagement shoot".to_string(),
//!         })
//!         .await?;
//!     println!("order {} is {}", order.id, order.state);
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod meeting;
pub mod models;
pub mod orders;
pub mod repositories;

pub use broker::{Backends, Broker};
pub use config::Settings;
pub use error::{BookingError, BookingResult};
