//! Payment authorizer.
//!
//! Reserves funds for an order exactly once per dedup key, however many
//! times it is asked. The gateway call is the one financial side effect of
//! the saga; its outcome is committed to the idempotency store before the
//! corresponding event is published.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{EventId, OrderId, PaymentAttemptId, UserId};
use domain::{
    Money, PaymentAttempt, PaymentAttemptOutcome, PaymentAuthorizedData, PaymentDeclinedData,
    PaymentInstrument, SagaEvent,
};
use idempotency::{ClaimOutcome, IdempotencyStore};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::outbox::{Outbox, Publication, decode_committed};
use crate::services::{ChargeRequest, ChargeResult, PaymentGateway};
use crate::stores::PaymentLedger;
use crate::topics::{PAYMENT_AUTHORIZER, PAYMENTS, topic_for};

/// A request to authorize an order's payment.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub instrument: PaymentInstrument,

    /// Repeated requests with the same key charge at most once.
    pub dedup_key: String,

    /// Event that triggered the authorization.
    pub causation_id: Option<EventId>,
}

/// Definitive outcome of an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Authorized {
        transaction_ref: String,
        attempt_id: PaymentAttemptId,
    },
    Declined {
        reason: String,
        attempt_id: PaymentAttemptId,
    },
}

impl AuthorizationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationOutcome::Authorized { .. } => "authorized",
            AuthorizationOutcome::Declined { .. } => "declined",
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationOutcome::Authorized { .. })
    }

    /// Recovers the outcome from a published payment event.
    pub fn from_event(event: &SagaEvent) -> Option<Self> {
        match event {
            SagaEvent::PaymentAuthorized(d) => Some(AuthorizationOutcome::Authorized {
                transaction_ref: d.transaction_ref.clone(),
                attempt_id: d.attempt_id,
            }),
            SagaEvent::PaymentDeclined(d) => Some(AuthorizationOutcome::Declined {
                reason: d.reason.clone(),
                attempt_id: d.attempt_id,
            }),
            _ => None,
        }
    }
}

/// Event id of the payment outcome for a dedup key.
pub fn payment_event_id(dedup_key: &str) -> EventId {
    EventId::derived(&format!("payment-outcome:{dedup_key}"))
}

/// Charges orders through the payment gateway, at most once per dedup key.
#[derive(Clone)]
pub struct PaymentAuthorizer {
    gateway: Arc<dyn PaymentGateway>,
    idempotency: Arc<dyn IdempotencyStore>,
    ledger: Arc<dyn PaymentLedger>,
    outbox: Outbox,
    timeout: Duration,
}

impl PaymentAuthorizer {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        idempotency: Arc<dyn IdempotencyStore>,
        ledger: Arc<dyn PaymentLedger>,
        outbox: Outbox,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            idempotency,
            ledger,
            outbox,
            timeout,
        }
    }

    /// Authorizes a payment.
    ///
    /// A key that was already authorized or declined returns the recorded
    /// outcome without calling the gateway. Gateway timeouts and connection
    /// failures release the claim and return [`SagaError::TransientInfra`];
    /// a claim held by a concurrent caller returns [`SagaError::InProgress`].
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, dedup_key = %request.dedup_key)
    )]
    pub async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome> {
        let key = request.dedup_key.as_str();

        match self.idempotency.try_claim(PAYMENT_AUTHORIZER, key).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyClaimed(record) => {
                let Some(committed) = decode_committed::<AuthorizationOutcome>(&record)? else {
                    return Err(SagaError::InProgress {
                        consumer: PAYMENT_AUTHORIZER.to_string(),
                        key: key.to_string(),
                    });
                };
                if !record.published {
                    self.outbox
                        .publish(PAYMENT_AUTHORIZER, key, &committed.publications)
                        .await;
                }
                tracing::debug!(outcome = committed.summary.as_str(), "Returning recorded outcome");
                metrics::counter!("payment_authorizations_total", "outcome" => "deduplicated")
                    .increment(1);
                return Ok(committed.summary);
            }
        }

        let sequence = match self.ledger.next_sequence(request.order_id).await {
            Ok(sequence) => sequence,
            Err(e) => return Err(self.abandon(key, e).await),
        };
        let attempt_id = PaymentAttemptId::for_attempt(request.order_id, sequence);
        let charge = ChargeRequest {
            idempotency_key: key.to_string(),
            attempt_id,
            order_id: request.order_id,
            amount: request.amount,
            instrument: request.instrument.clone(),
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.gateway.charge(&charge)).await {
            Ok(result) => result,
            Err(_) => Err(SagaError::TransientInfra(format!(
                "payment gateway timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };
        metrics::histogram!("payment_gateway_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        let charged = match result {
            Ok(charged) => charged,
            Err(e) => {
                tracing::warn!(error = %e, sequence, "Payment gateway call failed");
                let attempt = PaymentAttempt::new(
                    request.order_id,
                    sequence,
                    request.amount,
                    &request.instrument.reference,
                    PaymentAttemptOutcome::Error {
                        message: e.to_string(),
                    },
                );
                if let Err(ledger_error) = self.ledger.record(attempt).await {
                    tracing::warn!(error = %ledger_error, "Failed to record errored attempt");
                }
                metrics::counter!("payment_authorizations_total", "outcome" => "error")
                    .increment(1);
                return Err(self.abandon(key, e).await);
            }
        };

        let (outcome, attempt_outcome) = match charged {
            ChargeResult::Approved { transaction_ref } => (
                AuthorizationOutcome::Authorized {
                    transaction_ref: transaction_ref.clone(),
                    attempt_id,
                },
                PaymentAttemptOutcome::Authorized { transaction_ref },
            ),
            ChargeResult::Declined { reason } => (
                AuthorizationOutcome::Declined {
                    reason: reason.clone(),
                    attempt_id,
                },
                PaymentAttemptOutcome::Declined { reason },
            ),
        };

        // From here on the charge happened. The claim is kept even if
        // bookkeeping fails, so a retry cannot charge a second time.
        self.ledger
            .record(PaymentAttempt::new(
                request.order_id,
                sequence,
                request.amount,
                &request.instrument.reference,
                attempt_outcome,
            ))
            .await?;

        let event = Self::outcome_event(request, &outcome);
        let record = event.to_record(payment_event_id(key), request.causation_id)?;
        let publications = vec![Publication::new(topic_for(&event), record)];

        self.outbox
            .commit(PAYMENT_AUTHORIZER, key, &outcome, &publications)
            .await?;
        self.outbox
            .publish(PAYMENT_AUTHORIZER, key, &publications)
            .await;

        tracing::info!(outcome = outcome.as_str(), sequence, "Payment authorization settled");
        metrics::counter!("payment_authorizations_total", "outcome" => outcome.as_str())
            .increment(1);

        Ok(outcome)
    }

    /// Republishes outcomes that were committed but never published.
    pub async fn republish_unpublished(&self) -> Result<usize> {
        self.outbox.republish(PAYMENT_AUTHORIZER).await
    }

    /// Returns the recorded outcome of a dedup key, if any.
    pub async fn recorded_outcome(&self, dedup_key: &str) -> Result<Option<AuthorizationOutcome>> {
        let Some(record) = self.idempotency.get(PAYMENT_AUTHORIZER, dedup_key).await? else {
            return Ok(None);
        };
        Ok(decode_committed::<AuthorizationOutcome>(&record)?.map(|c| c.summary))
    }

    /// Releases the claim after a failure that happened before any charge.
    async fn abandon(&self, key: &str, error: SagaError) -> SagaError {
        if let Err(e) = self.idempotency.release(PAYMENT_AUTHORIZER, key).await {
            tracing::warn!(error = %e, "Failed to release authorization claim");
        }
        error
    }

    fn outcome_event(request: &AuthorizationRequest, outcome: &AuthorizationOutcome) -> SagaEvent {
        let now = Utc::now();
        match outcome {
            AuthorizationOutcome::Authorized {
                transaction_ref,
                attempt_id,
            } => SagaEvent::PaymentAuthorized(PaymentAuthorizedData {
                order_id: request.order_id,
                user_id: request.user_id,
                attempt_id: *attempt_id,
                amount: request.amount,
                transaction_ref: transaction_ref.clone(),
                authorized_at: now,
            }),
            AuthorizationOutcome::Declined { reason, attempt_id } => {
                SagaEvent::PaymentDeclined(PaymentDeclinedData {
                    order_id: request.order_id,
                    user_id: request.user_id,
                    attempt_id: *attempt_id,
                    amount: request.amount,
                    reason: reason.clone(),
                    declined_at: now,
                })
            }
        }
    }
}
