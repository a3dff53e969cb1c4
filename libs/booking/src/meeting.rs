//! In-person meeting proof
//!
//! The client asks for a challenge while standing at the meeting point. A
//! fresh symmetric key is cached under `meeting:{order_id}` and the client's
//! persistent secret is encrypted with it. The photographer scans the
//! resulting payload and submits it; the key is consumed on success so a
//! payload confirms at most once.

use common::error::CacheError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::credentials::CredentialNamespace;
use crate::crypto;
use crate::error::{BookingError, BookingResult};
use crate::ledger::EscrowLedger;
use crate::models::{Location, Order, OrderId, OrderState, UserId};
use crate::orders::OrderService;

/// Cache prefix for meeting keys
pub const MEETING_KEY_PREFIX: &str = "meeting";

/// Payload format version
pub const CHALLENGE_VERSION: u8 = 1;

/// Decoded meeting challenge
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingChallenge {
    pub location: Location,
    pub order_id: OrderId,
    /// Hex-encoded nonce and ciphertext of the client's persistent secret
    pub ciphertext: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChallengePayload {
    v: u8,
    location: Location,
    order_id: OrderId,
    ciphertext: String,
}

impl MeetingChallenge {
    /// Versioned JSON text handed to the photographer
    pub fn encode(&self) -> String {
        serde_json::json!({
            "v": CHALLENGE_VERSION,
            "location": self.location,
            "order_id": self.order_id,
            "ciphertext": self.ciphertext,
        })
        .to_string()
    }

    /// Parse a payload; malformed or unknown versions are `ChallengeInvalid`
    pub fn decode(payload: &str) -> BookingResult<Self> {
        let parsed: ChallengePayload =
            serde_json::from_str(payload).map_err(|_| BookingError::ChallengeInvalid)?;
        if parsed.v != CHALLENGE_VERSION {
            return Err(BookingError::ChallengeInvalid);
        }
        Ok(Self {
            location: parsed.location,
            order_id: parsed.order_id,
            ciphertext: parsed.ciphertext,
        })
    }
}

/// A challenge ready to be shown to the photographer
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub payload: String,
    pub expires_in: Duration,
}

/// Issues and checks meeting challenges
#[derive(Clone)]
pub struct MeetingVerifier {
    orders: OrderService,
    ledger: EscrowLedger,
    keys: CredentialNamespace,
}

impl MeetingVerifier {
    pub fn new(orders: OrderService, ledger: EscrowLedger, keys: CredentialNamespace) -> Self {
        Self {
            orders,
            ledger,
            keys,
        }
    }

    /// Record the client's location and issue a challenge for it
    ///
    /// Issuing again replaces the key, so only the latest payload verifies.
    pub async fn begin_challenge(
        &self,
        order_id: OrderId,
        client_id: UserId,
        location: Location,
    ) -> BookingResult<IssuedChallenge> {
        let order = self
            .orders
            .request_meeting_proof(order_id, client_id, location)
            .await?;
        let account = self.ledger.account(order.client_id).await?;

        let key = crypto::generate_key();
        let ciphertext = crypto::encrypt(&key, &account.persistent_secret)?;
        self.keys.put(order_id, &crypto::encode_key(&key)).await?;

        let challenge = MeetingChallenge {
            location,
            order_id,
            ciphertext,
        };
        info!("Issued meeting challenge for order {}", order_id);

        Ok(IssuedChallenge {
            payload: challenge.encode(),
            expires_in: self.keys.ttl(),
        })
    }

    /// Verify a scanned payload and move the order to `Meeting`
    ///
    /// Every content check failing looks the same to the caller. Nothing is
    /// consumed or changed until all of them pass.
    pub async fn confirm_challenge(
        &self,
        payload: &str,
        photographer_id: UserId,
    ) -> BookingResult<Order> {
        let challenge = MeetingChallenge::decode(payload)?;
        let order_id = challenge.order_id;

        let encoded_key = match self.keys.fetch(order_id).await {
            Ok(key) => key,
            Err(CacheError::Missing(_)) => return Err(BookingError::ChallengeExpired),
            Err(err) => return Err(err.into()),
        };

        let Some(order) = self
            .verified_order(&challenge, &encoded_key, photographer_id)
            .await?
        else {
            return Err(self.rejection(order_id, &encoded_key).await?);
        };

        if !self.keys.consume_if(order_id, &encoded_key).await? {
            warn!(
                "Meeting challenge for order {} was consumed or re-issued",
                order_id
            );
            return Err(BookingError::ChallengeExpired);
        }

        let order = self.orders.confirm_meeting(order, photographer_id).await?;
        info!(
            "Photographer {} confirmed meeting for order {}",
            photographer_id, order_id
        );
        Ok(order)
    }

    /// Error for a challenge that failed verification
    ///
    /// A concurrent confirmation may have consumed the key and moved the order
    /// on while this one was checking; that is reported as expired.
    async fn rejection(
        &self,
        order_id: OrderId,
        encoded_key: &str,
    ) -> BookingResult<BookingError> {
        match self.keys.fetch(order_id).await {
            Ok(current) if current == encoded_key => Ok(BookingError::ChallengeInvalid),
            Ok(_) | Err(CacheError::Missing(_)) => Ok(BookingError::ChallengeExpired),
            Err(err) => Err(err.into()),
        }
    }

    /// The order the challenge proves a meeting for, or `None` on any mismatch
    async fn verified_order(
        &self,
        challenge: &MeetingChallenge,
        encoded_key: &str,
        photographer_id: UserId,
    ) -> BookingResult<Option<Order>> {
        let order_id = challenge.order_id;
        let secret = match crypto::decode_key(encoded_key)
            .and_then(|key| crypto::decrypt(&key, &challenge.ciphertext))
        {
            Ok(secret) => secret,
            Err(err) => {
                warn!("Meeting challenge for order {} failed to decrypt: {}", order_id, err);
                return Ok(None);
            }
        };

        let Some(order) = self.orders.find(order_id).await? else {
            warn!("Meeting challenge names unknown order {}", order_id);
            return Ok(None);
        };

        if order.state != OrderState::AgreedClient {
            warn!("Meeting challenge for order {} in state {}", order_id, order.state);
            return Ok(None);
        }
        if order.photographer_id != Some(photographer_id) {
            warn!(
                "Photographer {} is not assigned to order {}",
                photographer_id, order_id
            );
            return Ok(None);
        }
        if order.client_current_location != Some(challenge.location) {
            warn!("Meeting challenge location does not match order {}", order_id);
            return Ok(None);
        }

        match self.ledger.find_account(order.client_id).await? {
            Some(account) if account.persistent_secret == secret => Ok(Some(order)),
            _ => {
                warn!("Meeting challenge secret does not match client of order {}", order_id);
                Ok(None)
            }
        }
    }
}
