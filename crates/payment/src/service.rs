//! Payment operations exposed at the RPC boundary.

use std::time::Duration;

use chrono::Utc;
use common::PaymentId;
use event_bus::{EventBus, PaymentCompleted, Producer};

use crate::store::PaymentStore;
use crate::{Payment, PaymentError, PaymentRequest, PaymentStatus, Refund, RefundId, Result};

/// Stand-in for the round trip to a card processor.
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(100);

/// Payment service.
pub struct PaymentService<S: PaymentStore, B: EventBus> {
    store: S,
    producer: Producer<B>,
    processing_delay: Duration,
}

impl<S: PaymentStore, B: EventBus> PaymentService<S, B> {
    pub fn new(store: S, producer: Producer<B>) -> Self {
        Self {
            store,
            producer,
            processing_delay: DEFAULT_PROCESSING_DELAY,
        }
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores the payment as pending, settles it, then announces it.
    ///
    /// An order is paid at most once: a request for an order whose latest
    /// payment is pending or completed fails with `OrderAlreadyPaid`. A
    /// refunded order can be paid again.
    ///
    /// A failed announcement is logged and counted; the completed payment is
    /// still returned.
    #[tracing::instrument(skip_all, fields(order_id = %request.order_id, user_id = %request.user_id, payment_id))]
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<Payment> {
        request.validate()?;
        let card = request
            .card
            .as_ref()
            .map(|card| card.to_metadata())
            .transpose()?;

        if let Some(existing) = self.store.get_by_order(&request.order_id).await? {
            if existing.status != PaymentStatus::Refunded {
                return Err(PaymentError::OrderAlreadyPaid {
                    order_id: request.order_id.clone(),
                    payment_id: existing.id,
                });
            }
        }

        let payment = Payment::pending(&request, card);
        tracing::Span::current().record("payment_id", tracing::field::display(&payment.id));
        self.store.create(&payment).await?;

        tokio::time::sleep(self.processing_delay).await;

        let payment = self
            .store
            .transition(
                &payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Completed,
                None,
            )
            .await?;
        metrics::counter!("payments_processed_total", "status" => "completed").increment(1);
        tracing::info!(amount = %payment.amount, currency = %payment.currency, "payment completed");

        self.announce(&payment).await;
        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_payment_status(&self, id: &PaymentId) -> Result<Payment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.clone()))
    }

    /// Refunds a completed payment. Any other status is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn refund_payment(&self, id: &PaymentId) -> Result<Refund> {
        let current = self.get_payment_status(id).await?;
        if current.status != PaymentStatus::Completed {
            return Err(PaymentError::InvalidState {
                id: id.clone(),
                expected: PaymentStatus::Completed,
                actual: current.status,
            });
        }

        tokio::time::sleep(self.processing_delay).await;

        let refund_id = RefundId::generate();
        let payment = self
            .store
            .transition(
                id,
                PaymentStatus::Completed,
                PaymentStatus::Refunded,
                Some(&refund_id),
            )
            .await?;
        metrics::counter!("payments_processed_total", "status" => "refunded").increment(1);
        tracing::info!(%refund_id, "payment refunded");

        Ok(Refund { refund_id, payment })
    }

    async fn announce(&self, payment: &Payment) {
        let event = PaymentCompleted {
            payment_id: payment.id.clone(),
            order_id: payment.order_id.clone(),
            user_id: payment.user_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.payment_method.clone(),
            completed_at: Utc::now(),
        };

        if let Err(e) = self.producer.publish(&event).await {
            metrics::counter!("payments_publish_failures_total").increment(1);
            tracing::warn!(error = %e, "failed to publish payment completed event");
        }
    }
}
