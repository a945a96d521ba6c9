//! Order saga controller.
//!
//! Owns the order record and drives it from checkout to a terminal state:
//! reserve stock, authorize the payment, then confirm (committing the stock)
//! or fail (releasing it). The terminal step runs under the claim
//! `(order-saga, order_id)`, so whichever of the synchronous checkout path
//! and the event-driven consumer path gets there first is the only one that
//! touches stock and publishes the terminal event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{EventId, OrderId, UserId};
use domain::{
    Aggregate, CartSnapshot, FailureKind, Order, OrderState, PaymentInstrument, SagaEvent,
    ShippingAddress,
};
use event_log::{Delivery, EventLog};
use idempotency::{ClaimOutcome, IdempotencyStore};

use crate::authorizer::{
    AuthorizationOutcome, AuthorizationRequest, PaymentAuthorizer, payment_event_id,
};
use crate::dead_letter::MessageHandler;
use crate::error::{CheckoutError, Result, SagaError};
use crate::notification::{Notification, NotificationTransport};
use crate::outbox::{Outbox, Publication, decode_committed};
use crate::retry::BackoffPolicy;
use crate::services::{ReservationResult, StockService};
use crate::stores::OrderRepository;
use crate::topics::{ORDER_SAGA, ORDERS, PAYMENTS};

/// Event id of an order's `CheckoutRequested` event.
pub fn checkout_event_id(order_id: OrderId) -> EventId {
    EventId::derived(&format!("checkout:{order_id}"))
}

/// Event id of an order's `OrderConfirmed` or `OrderFailed` event.
pub fn terminal_event_id(order_id: OrderId) -> EventId {
    EventId::derived(&format!("order-terminal:{order_id}"))
}

/// Event id of an order's `OrderCancelled` event.
pub fn cancellation_event_id(order_id: OrderId) -> EventId {
    EventId::derived(&format!("order-cancelled:{order_id}"))
}

/// A checkout as submitted by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub cart: CartSnapshot,
    pub instrument: PaymentInstrument,
    pub shipping_address: ShippingAddress,
}

/// How a pending order is to be settled.
#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Confirm { transaction_ref: String },
    Fail { kind: FailureKind, reason: String },
}

impl Decision {
    fn from_outcome(outcome: AuthorizationOutcome) -> Self {
        match outcome {
            AuthorizationOutcome::Authorized {
                transaction_ref, ..
            } => Decision::Confirm { transaction_ref },
            AuthorizationOutcome::Declined { reason, .. } => Decision::Fail {
                kind: FailureKind::PaymentDeclined,
                reason,
            },
        }
    }

    /// What the checkout caller is told.
    fn into_checkout_result(self, order_id: OrderId) -> std::result::Result<OrderId, CheckoutError> {
        match self {
            Decision::Confirm { .. } => Ok(order_id),
            Decision::Fail { kind, reason } => Err(match kind {
                FailureKind::PaymentDeclined => CheckoutError::PaymentDeclined(reason),
                FailureKind::AuthorizerUnavailable => CheckoutError::AuthorizerUnavailable(reason),
                FailureKind::OutOfStock => CheckoutError::OutOfStock(reason),
            }),
        }
    }
}

/// Result of a finalisation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// This caller settled the order.
    Applied(Order),

    /// The order was settled by someone else.
    AlreadySettled,
}

/// Counts from a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Committed results whose events were published late.
    pub republished: usize,

    /// Log records applied to rebuild order state.
    pub events_replayed: usize,

    /// Pending orders settled from an already published payment outcome.
    pub finalized: usize,

    /// Pending orders whose authorization was resumed.
    pub resumed: usize,
}

/// Drives orders through the fulfillment saga.
#[derive(Clone)]
pub struct OrderSagaController {
    orders: Arc<dyn OrderRepository>,
    stock: Arc<dyn StockService>,
    idempotency: Arc<dyn IdempotencyStore>,
    log: Arc<dyn EventLog>,
    notifier: Arc<dyn NotificationTransport>,
    authorizer: PaymentAuthorizer,
    outbox: Outbox,
    backoff: BackoffPolicy,
}

impl OrderSagaController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        stock: Arc<dyn StockService>,
        idempotency: Arc<dyn IdempotencyStore>,
        log: Arc<dyn EventLog>,
        notifier: Arc<dyn NotificationTransport>,
        authorizer: PaymentAuthorizer,
        outbox: Outbox,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            orders,
            stock,
            idempotency,
            log,
            notifier,
            authorizer,
            outbox,
            backoff,
        }
    }

    /// Checks out a cart.
    ///
    /// Returns the order id once the order is confirmed. Every failure after
    /// validation leaves the order `Failed` with its stock released.
    ///
    /// Dropping the returned future before authorization starts abandons the
    /// checkout; after that, the saga finishes on a detached task.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn checkout(
        &self,
        request: CheckoutRequest,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let start = Instant::now();
        let result = self.run_checkout(request).await;

        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => e.kind(),
        };
        metrics::counter!("checkout_total", "outcome" => outcome).increment(1);
        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());

        match &result {
            Ok(order_id) => tracing::info!(%order_id, "Checkout confirmed"),
            Err(e) => tracing::info!(outcome, error = %e, "Checkout did not confirm"),
        }
        result
    }

    async fn run_checkout(
        &self,
        request: CheckoutRequest,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let order_id = OrderId::new();
        let event = Order::checkout(
            order_id,
            request.user_id,
            request.cart,
            request.instrument,
            request.shipping_address,
        )
        .map_err(|e| CheckoutError::Validation(e.to_string()))?;

        let order = Order::from_events([event.clone()]);
        self.orders.insert(order.clone()).await?;

        let event_id = checkout_event_id(order_id);
        let record = event.to_record(event_id, None).map_err(SagaError::from)?;
        if let Err(e) = self.log.publish(ORDERS, record).await {
            // The synchronous path does not depend on the event; consumers
            // only use it to build their view of the order.
            tracing::warn!(%order_id, error = %e, "Failed to publish CheckoutRequested");
        }
        self.notify(event_id, &event);

        self.run_saga(order, event_id).await
    }

    /// Reserves stock, then authorizes and settles on a detached task.
    async fn run_saga(
        &self,
        order: Order,
        causation_id: EventId,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let order_id = order
            .id()
            .ok_or_else(|| CheckoutError::Internal("order has no id".to_string()))?;

        if let Some(decision) = self.reserve_stock(order_id, &order).await? {
            return self.finalize_for_checkout(order_id, decision, causation_id).await;
        }

        let saga = self.clone();
        let handle =
            tokio::spawn(async move { saga.authorize_and_finalize(order, causation_id).await });
        handle
            .await
            .map_err(|e| CheckoutError::Internal(format!("saga task failed: {e}")))?
    }

    /// Returns a failure decision if stock could not be reserved.
    async fn reserve_stock(&self, order_id: OrderId, order: &Order) -> Result<Option<Decision>> {
        let mut attempt = 1;
        loop {
            match self.stock.reserve_stock(order_id, order.items()).await {
                Ok(ReservationResult::Reserved) => return Ok(None),
                Ok(ReservationResult::Insufficient {
                    product_id,
                    requested,
                    available,
                }) => {
                    return Ok(Some(Decision::Fail {
                        kind: FailureKind::OutOfStock,
                        reason: format!(
                            "insufficient stock for {product_id}: requested {requested}, available {available}"
                        ),
                    }));
                }
                Err(e) if e.is_transient() && self.backoff.should_retry(attempt) => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(%order_id, attempt, error = %e, "Stock reservation failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn authorize_and_finalize(
        &self,
        order: Order,
        causation_id: EventId,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let (Some(order_id), Some(user_id), Some(instrument)) =
            (order.id(), order.user_id(), order.instrument().cloned())
        else {
            return Err(CheckoutError::Internal("order is incomplete".to_string()));
        };

        let request = AuthorizationRequest {
            order_id,
            user_id,
            amount: order.total(),
            instrument,
            dedup_key: order_id.to_string(),
            causation_id: Some(causation_id),
        };

        let (decision, causation_id) = match self.authorize_with_retry(&request).await {
            Ok(outcome) => (
                Decision::from_outcome(outcome),
                payment_event_id(&request.dedup_key),
            ),
            // Someone else is mid-charge; settling now could contradict them.
            Err(e @ SagaError::InProgress { .. }) => {
                return Err(CheckoutError::AuthorizerUnavailable(e.to_string()));
            }
            Err(e) if e.is_transient() => (
                Decision::Fail {
                    kind: FailureKind::AuthorizerUnavailable,
                    reason: e.to_string(),
                },
                causation_id,
            ),
            // The charge may have happened; leave the order pending for
            // recovery to settle from the recorded outcome.
            Err(e) => {
                tracing::error!(%order_id, error = %e, "Authorization failed permanently");
                return Err(CheckoutError::Internal(e.to_string()));
            }
        };

        self.finalize_for_checkout(order_id, decision, causation_id).await
    }

    async fn authorize_with_retry(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome> {
        let mut attempt = 1;
        loop {
            match self.authorizer.authorize(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && self.backoff.should_retry(attempt) => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        order_id = %request.order_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Authorization failed transiently; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Settles the order on the checkout path and maps it to the result.
    ///
    /// If the claim is still held by the consumer path after waiting, the
    /// stored order decides: settled orders report their state, pending
    /// ones report the authorizer as unavailable.
    async fn finalize_for_checkout(
        &self,
        order_id: OrderId,
        decision: Decision,
        causation_id: EventId,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let settled = match self
            .finalize_waiting(order_id, decision.clone(), Some(causation_id))
            .await
        {
            Ok(settled) => settled,
            Err(e @ SagaError::InProgress { .. }) => {
                let pending = self
                    .orders
                    .get(order_id)
                    .await?
                    .is_none_or(|order| !order.state().is_settled());
                if pending {
                    tracing::warn!(%order_id, "Order still being settled elsewhere");
                    return Err(CheckoutError::AuthorizerUnavailable(e.to_string()));
                }
                Finalization::AlreadySettled
            }
            Err(e) => return Err(e.into()),
        };
        self.settled_result(order_id, decision, settled).await
    }

    /// Maps a settled order to the checkout result.
    ///
    /// If the event-driven path settled the order first, the stored state
    /// wins over this caller's decision.
    async fn settled_result(
        &self,
        order_id: OrderId,
        decision: Decision,
        settled: Finalization,
    ) -> std::result::Result<OrderId, CheckoutError> {
        let order = match settled {
            Finalization::Applied(order) => Some(order),
            Finalization::AlreadySettled => self.orders.get(order_id).await?,
        };

        match order.as_ref().map(|o| (o.state(), o.failure())) {
            Some((OrderState::Confirmed | OrderState::Cancelled, _)) => Ok(order_id),
            Some((OrderState::Failed, Some((kind, reason)))) => Decision::Fail {
                kind,
                reason: reason.to_string(),
            }
            .into_checkout_result(order_id),
            _ => decision.into_checkout_result(order_id),
        }
    }

    /// Like [`Self::finalize`], but waits while a concurrent finaliser
    /// holds the claim.
    async fn finalize_waiting(
        &self,
        order_id: OrderId,
        decision: Decision,
        causation_id: Option<EventId>,
    ) -> Result<Finalization> {
        let mut attempt = 1;
        loop {
            match self
                .finalize(order_id, decision.clone(), causation_id)
                .await
            {
                Err(SagaError::InProgress { .. }) if self.backoff.should_retry(attempt) => {
                    tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Settles a pending order exactly once.
    #[tracing::instrument(skip(self, decision))]
    async fn finalize(
        &self,
        order_id: OrderId,
        decision: Decision,
        causation_id: Option<EventId>,
    ) -> Result<Finalization> {
        let key = order_id.to_string();

        if let ClaimOutcome::AlreadyClaimed(record) =
            self.idempotency.try_claim(ORDER_SAGA, &key).await?
        {
            match decode_committed::<OrderState>(&record)? {
                Some(committed) => {
                    if !record.published {
                        self.outbox
                            .publish(ORDER_SAGA, &key, &committed.publications)
                            .await;
                    }
                    return Ok(Finalization::AlreadySettled);
                }
                None => {
                    return Err(SagaError::InProgress {
                        consumer: ORDER_SAGA.to_string(),
                        key,
                    });
                }
            }
        }

        let event = match self.settle(order_id, &decision).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.release_claim(&key).await;
                return Ok(Finalization::AlreadySettled);
            }
            Err(e) => {
                self.release_claim(&key).await;
                return Err(e);
            }
        };

        let order = match self.orders.apply_event(&event).await {
            Ok(order) => order,
            Err(e) => {
                self.release_claim(&key).await;
                return Err(e);
            }
        };

        self.compensate(order_id, &order, &decision).await;

        let event_id = terminal_event_id(order_id);
        let publications = vec![Publication::new(ORDERS, event.to_record(event_id, causation_id)?)];
        if let Err(e) = self
            .outbox
            .commit(ORDER_SAGA, &key, &order.state(), &publications)
            .await
        {
            // The order is settled either way; the event still goes out and
            // redeliveries see a settled order.
            tracing::error!(%order_id, error = %e, "Failed to commit finalisation");
        }

        self.notify(event_id, &event);
        self.outbox.publish(ORDER_SAGA, &key, &publications).await;

        tracing::info!(%order_id, state = %order.state(), "Order settled");
        Ok(Finalization::Applied(order))
    }

    /// Builds the terminal event, or None if the order is already settled.
    async fn settle(&self, order_id: OrderId, decision: &Decision) -> Result<Option<SagaEvent>> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;

        if order.state().is_settled() {
            return Ok(None);
        }

        let event = match decision {
            Decision::Confirm { transaction_ref } => order.confirm(transaction_ref.clone())?,
            Decision::Fail { kind, reason } => order.fail(*kind, reason.clone())?,
        };
        Ok(Some(event))
    }

    /// Commits stock for a confirmed order and releases it for a failed one.
    async fn compensate(&self, order_id: OrderId, order: &Order, decision: &Decision) {
        let result = match decision {
            Decision::Confirm { .. } => self.stock.commit_stock(order_id, order.items()).await,
            // Nothing was reserved.
            Decision::Fail {
                kind: FailureKind::OutOfStock,
                ..
            } => Ok(()),
            Decision::Fail { .. } => self.stock.release_stock(order_id, order.items()).await,
        };

        if let Err(e) = result {
            tracing::error!(%order_id, error = %e, "Stock compensation failed");
        }
    }

    async fn release_claim(&self, key: &str) {
        if let Err(e) = self.idempotency.release(ORDER_SAGA, key).await {
            tracing::warn!(key, error = %e, "Failed to release finalisation claim");
        }
    }

    fn notify(&self, event_id: EventId, event: &SagaEvent) {
        self.notifier
            .push(event.user_id(), Notification::new(event_id, event.clone()));
    }

    /// Cancels a confirmed order.
    ///
    /// Cancelling an already cancelled order is a no-op. Stock stays
    /// committed and the total is unchanged.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;

        if order.state() == OrderState::Cancelled {
            return Ok(order);
        }
        let event = order.cancel(reason)?;

        let key = format!("cancel:{order_id}");
        if let ClaimOutcome::AlreadyClaimed(record) =
            self.idempotency.try_claim(ORDER_SAGA, &key).await?
        {
            if let Some(committed) = decode_committed::<OrderState>(&record)?
                && !record.published
            {
                self.outbox
                    .publish(ORDER_SAGA, &key, &committed.publications)
                    .await;
            }
            return Err(SagaError::InProgress {
                consumer: ORDER_SAGA.to_string(),
                key,
            });
        }

        let updated = match self.orders.apply_event(&event).await {
            Ok(order) => order,
            Err(e) => {
                self.release_claim(&key).await;
                return Err(e);
            }
        };

        let event_id = cancellation_event_id(order_id);
        let publications = vec![Publication::new(ORDERS, event.to_record(event_id, None)?)];
        self.outbox
            .commit(ORDER_SAGA, &key, &updated.state(), &publications)
            .await?;
        self.notify(event_id, &event);
        self.outbox.publish(ORDER_SAGA, &key, &publications).await;

        tracing::info!(%order_id, reason, "Order cancelled");
        metrics::counter!("orders_cancelled_total").increment(1);
        Ok(updated)
    }

    /// Looks an order up.
    pub async fn order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.orders.get(order_id).await
    }

    /// Returns a user's order history, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.orders.list_by_user(user_id).await
    }

    /// Restores a consistent state after a restart.
    ///
    /// Publishes committed-but-unpublished results, replays the order and
    /// payment topics into the repository, settles pending orders whose
    /// payment outcome is on the log, and resumes the rest with the same
    /// dedup key, so no order is charged twice.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            republished: self.authorizer.republish_unpublished().await?
                + self.outbox.republish(ORDER_SAGA).await?,
            ..RecoveryReport::default()
        };

        for record in self.log.replay(ORDERS).await? {
            let event = match SagaEvent::from_record(&record) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(event_id = %record.event_id, error = %e, "Skipping undecodable record");
                    continue;
                }
            };
            match self.orders.apply_event(&event).await {
                Ok(_) => report.events_replayed += 1,
                Err(SagaError::OrderNotFound(order_id)) => {
                    tracing::warn!(%order_id, "Skipping event for unknown order");
                }
                Err(e) => return Err(e),
            }
        }

        let mut outcomes: HashMap<OrderId, (AuthorizationOutcome, EventId)> = HashMap::new();
        for record in self.log.replay(PAYMENTS).await? {
            let Ok(event) = SagaEvent::from_record(&record) else {
                continue;
            };
            if let Some(outcome) = AuthorizationOutcome::from_event(&event) {
                outcomes
                    .entry(event.order_id())
                    .or_insert((outcome, record.event_id));
                report.events_replayed += 1;
            }
        }

        for order in self.orders.list_by_state(OrderState::PendingPayment).await? {
            let Some(order_id) = order.id() else {
                continue;
            };

            if let Some((outcome, event_id)) = outcomes.remove(&order_id) {
                match self
                    .finalize(order_id, Decision::from_outcome(outcome), Some(event_id))
                    .await
                {
                    Ok(_) => report.finalized += 1,
                    Err(e) => tracing::warn!(%order_id, error = %e, "Could not settle order"),
                }
                continue;
            }

            match self.run_saga(order, checkout_event_id(order_id)).await {
                Ok(_) => report.resumed += 1,
                Err(CheckoutError::Internal(e)) => {
                    tracing::warn!(%order_id, error = %e, "Could not resume order");
                }
                Err(e) => {
                    tracing::info!(%order_id, error = %e, "Resumed order did not confirm");
                    report.resumed += 1;
                }
            }
        }

        tracing::info!(
            republished = report.republished,
            replayed = report.events_replayed,
            finalized = report.finalized,
            resumed = report.resumed,
            "Recovery complete"
        );
        Ok(report)
    }

    fn decision_for(event: &SagaEvent) -> Option<Decision> {
        AuthorizationOutcome::from_event(event).map(Decision::from_outcome)
    }
}

#[async_trait]
impl MessageHandler for OrderSagaController {
    fn name(&self) -> &str {
        ORDER_SAGA
    }

    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let event = SagaEvent::from_record(&delivery.record)
            .map_err(|e| SagaError::Malformed(e.to_string()))?;
        let event_id = delivery.record.event_id;
        let order_id = event.order_id();

        match &event {
            SagaEvent::CheckoutRequested(_) => {
                self.orders.apply_event(&event).await?;
                self.notify(event_id, &event);
            }
            SagaEvent::PaymentAuthorized(_) | SagaEvent::PaymentDeclined(_) => {
                let order = self
                    .orders
                    .get(order_id)
                    .await?
                    .ok_or(SagaError::OrderNotFound(order_id))?;
                if order.state().is_settled() {
                    tracing::debug!(%order_id, "Payment outcome for settled order ignored");
                    return Ok(());
                }
                if let Some(decision) = Self::decision_for(&event) {
                    self.finalize(order_id, decision, Some(event_id)).await?;
                }
            }
            SagaEvent::OrderConfirmed(_)
            | SagaEvent::OrderFailed(_)
            | SagaEvent::OrderCancelled(_) => {
                self.orders.apply_event(&event).await?;
                self.notify(event_id, &event);
            }
            SagaEvent::InvoiceCreated(_) => {}
        }
        Ok(())
    }
}
