use async_trait::async_trait;
use common::{OrderId, PaymentId};

use crate::{Payment, PaymentStatus, RefundId, Result};

/// Relational storage for payments.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>>;

    /// Most recent live payment for an order.
    async fn get_by_order(&self, order_id: &OrderId) -> Result<Option<Payment>>;

    async fn create(&self, payment: &Payment) -> Result<()>;

    /// Moves a payment from `from` to `to` and returns the updated row.
    ///
    /// Fails with `InvalidState` when the stored status is not `from`, so two
    /// racing transitions cannot both succeed.
    async fn transition(
        &self,
        id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        refund_id: Option<&RefundId>,
    ) -> Result<Payment>;
}

#[async_trait]
impl<S: PaymentStore + ?Sized> PaymentStore for std::sync::Arc<S> {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        (**self).get(id).await
    }

    async fn get_by_order(&self, order_id: &OrderId) -> Result<Option<Payment>> {
        (**self).get_by_order(order_id).await
    }

    async fn create(&self, payment: &Payment) -> Result<()> {
        (**self).create(payment).await
    }

    async fn transition(
        &self,
        id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        refund_id: Option<&RefundId>,
    ) -> Result<Payment> {
        (**self).transition(id, from, to, refund_id).await
    }
}
