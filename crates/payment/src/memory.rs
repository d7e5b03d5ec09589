use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentId};
use tokio::sync::RwLock;

use crate::store::PaymentStore;
use crate::{Payment, PaymentError, PaymentStatus, RefundId, Result};

/// In-memory payment store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .get(id)
            .filter(|p| p.deleted_at.is_none())
            .cloned())
    }

    async fn get_by_order(&self, order_id: &OrderId) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .filter(|p| &p.order_id == order_id && p.deleted_at.is_none())
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn create(&self, payment: &Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(PaymentError::AlreadyExists(payment.id.clone()));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        refund_id: Option<&RefundId>,
    ) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(id)
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| PaymentError::NotFound(id.clone()))?;

        if payment.status != from {
            return Err(PaymentError::InvalidState {
                id: id.clone(),
                expected: from,
                actual: payment.status,
            });
        }

        payment.status = to;
        if let Some(refund_id) = refund_id {
            payment.refund_id = Some(refund_id.clone());
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }
}
