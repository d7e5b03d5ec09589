use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, PaymentId, ProductId};
use event_bus::{EventHandler, HandlerError, PaymentCompleted};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::ProductStore;
use crate::{CatalogService, Result};

/// One product and quantity of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Source of the lines that make up an order.
#[async_trait]
pub trait OrderLines: Send + Sync {
    /// `None` when the order's lines cannot be looked up.
    async fn lines_for_order(&self, order_id: &OrderId) -> Result<Option<Vec<OrderLine>>>;
}

/// Order lookup for deployments without an order service.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableOrderLines;

#[async_trait]
impl OrderLines for UnavailableOrderLines {
    async fn lines_for_order(&self, _order_id: &OrderId) -> Result<Option<Vec<OrderLine>>> {
        Ok(None)
    }
}

/// Payments remembered as applied before the oldest is forgotten.
pub const APPLIED_PAYMENTS_CAPACITY: usize = 10_000;

/// Bounded set of applied payments, oldest evicted first.
#[derive(Debug)]
struct AppliedPayments {
    order: VecDeque<PaymentId>,
    ids: HashSet<PaymentId>,
    capacity: usize,
}

impl AppliedPayments {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &PaymentId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: PaymentId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Catalog reaction to completed payments.
///
/// Stock is only decremented from the order's lines, never from the payment
/// envelope itself. Without an order source the payment is acknowledged and
/// logged. Requests that stock rejects (missing product, insufficient stock)
/// are logged and acknowledged; store failures are returned for redelivery.
///
/// Redeliveries are recognised only while the payment is among the last
/// [`APPLIED_PAYMENTS_CAPACITY`] applied by this process. A restart forgets
/// them, so exactly-once decrements need the order source to record which
/// orders were fulfilled.
pub struct CatalogEventHandler<S: ProductStore, L: OrderLines = UnavailableOrderLines> {
    service: Arc<CatalogService<S>>,
    order_lines: L,
    applied: Mutex<AppliedPayments>,
}

impl<S: ProductStore> CatalogEventHandler<S> {
    pub fn new(service: Arc<CatalogService<S>>) -> Self {
        Self::with_order_lines(service, UnavailableOrderLines)
    }
}

impl<S: ProductStore, L: OrderLines> CatalogEventHandler<S, L> {
    pub fn with_order_lines(service: Arc<CatalogService<S>>, order_lines: L) -> Self {
        Self {
            service,
            order_lines,
            applied: Mutex::new(AppliedPayments::new(APPLIED_PAYMENTS_CAPACITY)),
        }
    }

    /// Remembers at most `capacity` applied payments.
    pub fn with_applied_capacity(mut self, capacity: usize) -> Self {
        self.applied = Mutex::new(AppliedPayments::new(capacity));
        self
    }
}

#[async_trait]
impl<S: ProductStore, L: OrderLines> EventHandler for CatalogEventHandler<S, L> {
    fn name(&self) -> &'static str {
        "catalog"
    }

    #[tracing::instrument(skip_all, fields(payment_id = %event.payment_id, order_id = %event.order_id))]
    async fn handle_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> std::result::Result<(), HandlerError> {
        // Deliveries of one payment share a partition and reach this handler
        // one at a time, so the lock is not held across the store calls.
        if self.applied.lock().await.contains(&event.payment_id) {
            tracing::debug!("payment already applied to stock");
            return Ok(());
        }

        let lines = match self.order_lines.lines_for_order(&event.order_id).await {
            Ok(Some(lines)) => lines,
            Ok(None) => {
                tracing::info!(
                    amount = %event.amount,
                    currency = %event.currency,
                    "order lines unavailable, stock left unchanged"
                );
                return Ok(());
            }
            Err(e) => return Err(HandlerError::from(common::Status::from(e))),
        };

        match self.service.decrement_for_order_lines(&lines).await {
            Ok(products) => {
                tracing::info!(products = products.len(), "stock decremented for order");
                self.applied.lock().await.insert(event.payment_id.clone());
                Ok(())
            }
            Err(e) if e.is_rejection() => {
                tracing::error!(error = %e, "order cannot be applied to stock");
                self.applied.lock().await.insert(event.payment_id.clone());
                Ok(())
            }
            Err(e) => Err(HandlerError::from(common::Status::from(e))),
        }
    }
}
