//! Order lifecycle state machine
//!
//! ```text
//! Created -> AgreedPhotographer -> AgreedClient -> Meeting -> WatermarkSent -> Finish
//!    \______________\__________________\______________\____________\_____> Finish (cancel)
//! ```
//!
//! Every transition is a conditional update keyed by the state the caller
//! observed. Losing that race reloads the order and re-checks the
//! precondition against the fresh state.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{BookingError, BookingResult, Operation, Resource};
use crate::ledger::{self, EscrowLedger, Tranche};
use crate::models::{
    AccountRole, Location, NewOrder, Order, OrderChange, OrderId, OrderState, UserId,
};
use crate::repositories::{CandidateStore, OrderStore};

use OrderState::*;

const OPEN: &[OrderState] = &[Created, AgreedPhotographer];
const AWAITING_CLIENT: &[OrderState] = &[AgreedPhotographer];
const AGREED: &[OrderState] = &[AgreedClient];
const IN_SESSION: &[OrderState] = &[Meeting, WatermarkSent];
const PREVIEWABLE: &[OrderState] = &[Meeting, WatermarkSent, Finish];
const FINISHABLE: &[OrderState] = &[WatermarkSent];
const CANCELLABLE: &[OrderState] = &[
    Created,
    AgreedPhotographer,
    AgreedClient,
    Meeting,
    WatermarkSent,
];

/// How often a transition re-checks after losing a race
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Result of a successful `finish`
#[derive(Debug, Clone)]
pub struct FinishedOrder {
    pub order: Order,
    pub original_asset_ref: String,
    pub released: i64,
}

/// Result of a successful `cancel`
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub order: Order,
    pub cancelled_in: OrderState,
    pub refunded: i64,
}

/// Order state machine over the order and candidate stores
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    candidates: Arc<dyn CandidateStore>,
    ledger: EscrowLedger,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        candidates: Arc<dyn CandidateStore>,
        ledger: EscrowLedger,
    ) -> Self {
        Self {
            orders,
            candidates,
            ledger,
        }
    }

    /// Find an order by ID
    pub async fn order(&self, order_id: OrderId) -> BookingResult<Order> {
        self.find(order_id)
            .await?
            .ok_or(BookingError::NotFound(Resource::Order(order_id)))
    }

    pub(crate) async fn find(&self, order_id: OrderId) -> BookingResult<Option<Order>> {
        Ok(self.orders.find(order_id).await?)
    }

    /// Photographers currently waiting for the client's decision
    pub async fn candidates(&self, order_id: OrderId) -> BookingResult<Vec<UserId>> {
        self.order(order_id).await?;
        Ok(self.candidates.list(order_id).await?)
    }

    /// Orders photographers can still select
    pub async fn list_open_orders(&self) -> BookingResult<Vec<Order>> {
        Ok(self.orders.list_by_states(OPEN).await?)
    }

    /// Reserve the cost from the client and create the order in `Created`
    ///
    /// If the row cannot be written the reservation is credited back. A
    /// failed credit leaves money outside both the account and any order and
    /// is reported as a consistency fault.
    pub async fn create_order(&self, new_order: NewOrder) -> BookingResult<Order> {
        new_order.validate().map_err(BookingError::InvalidOrder)?;

        let order_id = OrderId::new_v4();
        let client_id = new_order.client_id;
        let cost = new_order.cost;

        self.ledger.reserve(order_id, client_id, cost).await?;

        let order = new_order.into_order(order_id, Utc::now());
        if let Err(insert_err) = self.orders.insert(&order).await {
            error!("Failed to create order {}: {}", order_id, insert_err);

            if let Err(credit_err) = self
                .ledger
                .compensate_reservation(order_id, client_id, cost)
                .await
            {
                error!(
                    "CONSISTENCY FAULT: reservation of {} for order {} \
                     could not be returned to client {}: {}",
                    cost, order_id, client_id, credit_err
                );
                return Err(BookingError::ConsistencyFault {
                    order_id,
                    detail: format!(
                        "order insert failed ({insert_err}) \
                         and compensating credit failed ({credit_err})"
                    ),
                });
            }

            return Err(insert_err.into());
        }

        info!("Created order {} for client {} at cost {}", order_id, client_id, cost);
        Ok(order)
    }

    /// Record a photographer as a candidate for an open order
    ///
    /// The candidate is kept only if the order is still open once it is
    /// written; a cancel or accept landing in between undoes it.
    pub async fn select(
        &self,
        order_id: OrderId,
        photographer_id: UserId,
    ) -> BookingResult<Order> {
        match self.ledger.find_account(photographer_id).await? {
            Some(account) if account.role == AccountRole::Photographer => {}
            _ => return Err(BookingError::NotFound(Resource::Account(photographer_id))),
        }

        let order = self.order(order_id).await?;
        self.advance(
            Operation::Select,
            order,
            OPEN,
            |_| AgreedPhotographer,
            OrderChange::none(),
        )
        .await?;

        let added = self.candidates.add(order_id, photographer_id).await?;
        let current = self.order(order_id).await?;
        if !OPEN.contains(&current.state) && current.photographer_id != Some(photographer_id) {
            warn!(
                "Order {} moved to {} while photographer {} was selecting it",
                order_id, current.state, photographer_id
            );
            if added {
                self.candidates.remove(order_id, photographer_id).await?;
            }
            return Err(self.reject(Operation::Select, OPEN, &current));
        }

        if added {
            info!("Photographer {} selected order {}", photographer_id, order_id);
        }
        Ok(current)
    }

    /// Client's decision on one candidate
    ///
    /// Approving assigns the photographer and drops every other candidate.
    /// Declining removes only that candidate and leaves the state unchanged.
    pub async fn accept(
        &self,
        order_id: OrderId,
        photographer_id: UserId,
        approve: bool,
    ) -> BookingResult<Order> {
        let order = self.order(order_id).await?;
        if !AWAITING_CLIENT.contains(&order.state) {
            return Err(self.reject(Operation::Accept, AWAITING_CLIENT, &order));
        }
        if !self.candidates.contains(order_id, photographer_id).await? {
            // Another accept may have won and cleared the candidates meanwhile
            let current = self.order(order_id).await?;
            if !AWAITING_CLIENT.contains(&current.state) {
                return Err(self.reject(Operation::Accept, AWAITING_CLIENT, &current));
            }
            return Err(BookingError::NotFound(Resource::Candidate {
                order_id,
                photographer_id,
            }));
        }

        if !approve {
            self.candidates.remove(order_id, photographer_id).await?;
            info!("Client declined photographer {} for order {}", photographer_id, order_id);
            return Ok(order);
        }

        let (_, order) = self
            .advance(
                Operation::Accept,
                order,
                AWAITING_CLIENT,
                |_| AgreedClient,
                OrderChange::assign_photographer(photographer_id),
            )
            .await?;
        self.candidates.clear(order_id).await?;

        Ok(order)
    }

    /// Snapshot the client's location ahead of a meeting challenge
    pub async fn request_meeting_proof(
        &self,
        order_id: OrderId,
        client_id: UserId,
        location: Location,
    ) -> BookingResult<Order> {
        if !location.is_valid() {
            return Err(BookingError::InvalidOrder(
                "Meeting location is out of range".to_string(),
            ));
        }

        let order = self.owned_by_client(order_id, client_id).await?;
        let (_, order) = self
            .advance(
                Operation::RequestMeetingProof,
                order,
                AGREED,
                |state| state,
                OrderChange::client_location(location),
            )
            .await?;
        Ok(order)
    }

    /// Move a verified order to `Meeting` and pay the first tranche
    pub(crate) async fn confirm_meeting(
        &self,
        order: Order,
        photographer_id: UserId,
    ) -> BookingResult<Order> {
        let (_, order) = self
            .advance(
                Operation::ConfirmMeeting,
                order,
                AGREED,
                |_| Meeting,
                OrderChange::none(),
            )
            .await?;

        let amount = ledger::meeting_tranche(order.cost);
        self.pay_after_transition(&order, photographer_id, Tranche::Meeting, amount)
            .await?;
        Ok(order)
    }

    /// Attach the session's original and watermarked assets
    pub async fn upload_assets(
        &self,
        order_id: OrderId,
        photographer_id: UserId,
        original: String,
        watermarked: String,
    ) -> BookingResult<Order> {
        if original.trim().is_empty() || watermarked.trim().is_empty() {
            return Err(BookingError::InvalidOrder(
                "Asset references must not be empty".to_string(),
            ));
        }

        let order = self.order(order_id).await?;
        if order.photographer_id != Some(photographer_id) {
            return Err(BookingError::NotFound(Resource::Order(order_id)));
        }

        let (_, order) = self
            .advance(
                Operation::UploadAssets,
                order,
                IN_SESSION,
                |state| state,
                OrderChange::assets(original, watermarked),
            )
            .await?;
        info!("Assets uploaded for order {}", order_id);
        Ok(order)
    }

    /// Hand the watermarked preview to the client
    ///
    /// Re-fetching from `WatermarkSent` or `Finish` leaves the state as is.
    pub async fn reveal_preview(&self, order_id: OrderId) -> BookingResult<String> {
        let order = self.order(order_id).await?;
        if !PREVIEWABLE.contains(&order.state) {
            return Err(self.reject(Operation::RevealPreview, PREVIEWABLE, &order));
        }
        let Some(preview) = order.watermarked_asset_ref.clone() else {
            return Err(BookingError::AssetsNotReady(order_id));
        };

        if order.state == Meeting {
            self.advance(
                Operation::RevealPreview,
                order,
                PREVIEWABLE,
                |state| if state == Meeting { WatermarkSent } else { state },
                OrderChange::none(),
            )
            .await?;
        }

        Ok(preview)
    }

    /// Close the order and pay the remaining escrow to the photographer
    pub async fn finish(&self, order_id: OrderId) -> BookingResult<FinishedOrder> {
        let order = self.order(order_id).await?;
        let Some(original_asset_ref) = order.original_asset_ref.clone() else {
            if !FINISHABLE.contains(&order.state) {
                return Err(self.reject(Operation::Finish, FINISHABLE, &order));
            }
            return Err(BookingError::AssetsNotReady(order_id));
        };

        let (_, order) = self
            .advance(
                Operation::Finish,
                order,
                FINISHABLE,
                |_| Finish,
                OrderChange::none(),
            )
            .await?;

        let photographer_id = order.photographer_id.ok_or_else(|| {
            BookingError::ConsistencyFault {
                order_id,
                detail: "finished order has no assigned photographer".to_string(),
            }
        })?;
        let released = ledger::final_tranche(order.cost);
        self.pay_after_transition(&order, photographer_id, Tranche::Final, released)
            .await?;

        Ok(FinishedOrder {
            order,
            original_asset_ref,
            released,
        })
    }

    /// Cancel from any non-terminal state and refund what is still in escrow
    pub async fn cancel(
        &self,
        order_id: OrderId,
        client_id: UserId,
    ) -> BookingResult<Cancellation> {
        let order = self.owned_by_client(order_id, client_id).await?;
        let (cancelled_in, order) = self
            .advance(
                Operation::Cancel,
                order,
                CANCELLABLE,
                |_| Finish,
                OrderChange::none(),
            )
            .await?;

        self.candidates.clear(order_id).await?;

        let refunded = ledger::cancellation_refund(order.cost, cancelled_in);
        if let Err(err) = self
            .ledger
            .refund_client(order_id, order.client_id, refunded)
            .await
        {
            error!(
                "CONSISTENCY FAULT: order {} cancelled but refund of {} to client {} failed: {}",
                order_id, refunded, order.client_id, err
            );
            return Err(BookingError::ConsistencyFault {
                order_id,
                detail: format!("refund of {refunded} after cancellation failed: {err}"),
            });
        }

        Ok(Cancellation {
            order,
            cancelled_in,
            refunded,
        })
    }

    async fn owned_by_client(&self, order_id: OrderId, client_id: UserId) -> BookingResult<Order> {
        let order = self.order(order_id).await?;
        if order.client_id != client_id {
            return Err(BookingError::NotFound(Resource::Order(order_id)));
        }
        Ok(order)
    }

    async fn pay_after_transition(
        &self,
        order: &Order,
        photographer_id: UserId,
        tranche: Tranche,
        amount: i64,
    ) -> BookingResult<()> {
        if let Err(err) = self
            .ledger
            .release_to_photographer(order.id, photographer_id, tranche, amount)
            .await
        {
            error!(
                "CONSISTENCY FAULT: order {} is {} but release of {} to photographer {} failed: {}",
                order.id, order.state, amount, photographer_id, err
            );
            return Err(BookingError::ConsistencyFault {
                order_id: order.id,
                detail: format!("release of {amount} after {} failed: {err}", order.state),
            });
        }
        Ok(())
    }

    fn reject(
        &self,
        operation: Operation,
        allowed: &'static [OrderState],
        order: &Order,
    ) -> BookingError {
        warn!(
            "Rejected {} on order {} in state {}",
            operation, order.id, order.state
        );
        BookingError::rejected(operation, allowed, order.state)
    }

    /// Apply a transition, returning the state it left and the updated order
    async fn advance(
        &self,
        operation: Operation,
        mut order: Order,
        allowed: &'static [OrderState],
        next: fn(OrderState) -> OrderState,
        change: OrderChange,
    ) -> BookingResult<(OrderState, Order)> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if !allowed.contains(&order.state) {
                return Err(self.reject(operation, allowed, &order));
            }

            let from = order.state;
            let to = next(from);
            if self.orders.apply(order.id, from, to, &change).await? {
                change.apply_to(&mut order);
                order.state = to;
                order.updated_at = Utc::now();
                info!("Order {} {}: {} -> {}", order.id, operation, from, to);
                return Ok((from, order));
            }

            order = self.order(order.id).await?;
        }

        Err(self.reject(operation, allowed, &order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountSettings;
    use crate::repositories::memory::{MemoryAccountStore, MemoryCandidateStore, MemoryOrderStore};
    use uuid::Uuid;

    struct Fixture {
        service: OrderService,
        ledger: EscrowLedger,
        client: UserId,
    }

    async fn fixture() -> BookingResult<Fixture> {
        let ledger = EscrowLedger::new(
            Arc::new(MemoryAccountStore::new()),
            AccountSettings::default(),
        );
        let service = OrderService::new(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemoryCandidateStore::new()),
            ledger.clone(),
        );
        let client = Uuid::new_v4();
        ledger.open_account(client, AccountRole::Client).await?;
        Ok(Fixture {
            service,
            ledger,
            client,
        })
    }

    impl Fixture {
        async fn photographer(&self) -> BookingResult<UserId> {
            let id = Uuid::new_v4();
            self.ledger.open_account(id, AccountRole::Photographer).await?;
            Ok(id)
        }
    }

    fn new_order(client_id: UserId, cost: i64) -> NewOrder {
        NewOrder {
            client_id,
            cost,
            location: Location::new(59.93, 30.31),
            comment: "Family portrait".to_string(),
        }
    }

    #[tokio::test]
    async fn create_order_reserves_cost() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 400)).await?;

        assert_eq!(order.state, Created);
        assert_eq!(fx.ledger.balance_of(fx.client).await?, 600);
        assert_eq!(fx.ledger.movements(order.id).await?.reserved, 400);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_order_moves_no_money() -> BookingResult<()> {
        let fx = fixture().await?;
        let result = fx.service.create_order(new_order(fx.client, 0)).await;

        assert!(matches!(result, Err(BookingError::InvalidOrder(_))));
        assert_eq!(fx.ledger.balance_of(fx.client).await?, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_funds_creates_nothing() -> BookingResult<()> {
        let fx = fixture().await?;
        let result = fx.service.create_order(new_order(fx.client, 5000)).await;

        assert!(matches!(result, Err(BookingError::InsufficientFunds { .. })));
        assert!(fx.service.list_open_orders().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn decline_keeps_other_candidates() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;
        let first = fx.photographer().await?;
        let second = fx.photographer().await?;

        fx.service.select(order.id, first).await?;
        fx.service.select(order.id, second).await?;
        let order = fx.service.accept(order.id, first, false).await?;

        assert_eq!(order.state, AgreedPhotographer);
        assert_eq!(fx.service.candidates(order.id).await?, vec![second]);
        Ok(())
    }

    #[tokio::test]
    async fn approve_assigns_photographer_and_clears_candidates() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;
        let chosen = fx.photographer().await?;

        fx.service.select(order.id, chosen).await?;
        fx.service.select(order.id, fx.photographer().await?).await?;
        let order = fx.service.accept(order.id, chosen, true).await?;

        assert_eq!(order.state, AgreedClient);
        assert_eq!(order.photographer_id, Some(chosen));
        assert!(fx.service.candidates(order.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn accept_requires_recorded_candidate() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;
        fx.service.select(order.id, fx.photographer().await?).await?;

        let stranger = fx.photographer().await?;
        let result = fx.service.accept(order.id, stranger, true).await;
        assert!(matches!(
            result,
            Err(BookingError::NotFound(Resource::Candidate { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn select_requires_photographer_account() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;

        let unknown = Uuid::new_v4();
        let result = fx.service.select(order.id, unknown).await;
        assert!(matches!(
            result,
            Err(BookingError::NotFound(Resource::Account(id))) if id == unknown
        ));

        let result = fx.service.select(order.id, fx.client).await;
        assert!(matches!(result, Err(BookingError::NotFound(Resource::Account(_)))));

        let order = fx.service.order(order.id).await?;
        assert_eq!(order.state, Created);
        assert!(fx.service.candidates(order.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn accept_on_created_order_is_rejected() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;

        let result = fx.service.accept(order.id, Uuid::new_v4(), true).await;
        assert!(matches!(
            result,
            Err(BookingError::PreconditionFailed {
                operation: Operation::Accept,
                actual: Created,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn meeting_proof_requires_order_owner() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;
        let photographer = fx.photographer().await?;
        fx.service.select(order.id, photographer).await?;
        fx.service.accept(order.id, photographer, true).await?;

        let result = fx
            .service
            .request_meeting_proof(order.id, Uuid::new_v4(), Location::new(1.0, 1.0))
            .await;
        assert!(matches!(result, Err(BookingError::NotFound(Resource::Order(_)))));

        let order = fx
            .service
            .request_meeting_proof(order.id, fx.client, Location::new(1.0, 1.0))
            .await?;
        assert_eq!(order.state, AgreedClient);
        assert_eq!(order.client_current_location, Some(Location::new(1.0, 1.0)));
        Ok(())
    }

    #[tokio::test]
    async fn finish_before_watermark_is_rejected() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;

        let result = fx.service.finish(order.id).await;
        assert!(matches!(
            result,
            Err(BookingError::PreconditionFailed {
                operation: Operation::Finish,
                actual: Created,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn cancel_twice_is_rejected() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;

        let cancellation = fx.service.cancel(order.id, fx.client).await?;
        assert_eq!(cancellation.refunded, 500);
        assert_eq!(cancellation.cancelled_in, Created);

        let result = fx.service.cancel(order.id, fx.client).await;
        assert!(matches!(
            result,
            Err(BookingError::PreconditionFailed {
                operation: Operation::Cancel,
                actual: Finish,
                ..
            })
        ));
        assert_eq!(fx.ledger.balance_of(fx.client).await?, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn preview_before_meeting_is_rejected() -> BookingResult<()> {
        let fx = fixture().await?;
        let order = fx.service.create_order(new_order(fx.client, 500)).await?;

        let result = fx.service.reveal_preview(order.id).await;
        assert!(matches!(
            result,
            Err(BookingError::PreconditionFailed {
                operation: Operation::RevealPreview,
                ..
            })
        ));
        Ok(())
    }
}
