use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError, PaymentCompleted};

use crate::CartService;
use crate::store::CartStore;

/// Clears a shopper's cart once their payment has gone through.
///
/// Clearing is idempotent, so redelivered envelopes are harmless. Store
/// failures are returned and the envelope is delivered again.
pub struct CartEventHandler<S: CartStore> {
    service: std::sync::Arc<CartService<S>>,
}

impl<S: CartStore> CartEventHandler<S> {
    pub fn new(service: std::sync::Arc<CartService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: CartStore> EventHandler for CartEventHandler<S> {
    fn name(&self) -> &'static str {
        "cart"
    }

    #[tracing::instrument(skip_all, fields(payment_id = %event.payment_id, user_id = %event.user_id))]
    async fn handle_payment_completed(&self, event: &PaymentCompleted) -> Result<(), HandlerError> {
        match self.service.clear_basket(&event.user_id).await {
            Ok(_) => {
                tracing::info!(order_id = %event.order_id, "cart cleared after payment");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to clear cart after payment");
                Err(HandlerError::from(common::Status::from(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CartItem, InMemoryCartStore};
    use chrono::Utc;
    use common::{Money, OrderId, PaymentId, ProductId, UserId};
    use std::sync::Arc;

    fn payment_completed(user: &str) -> PaymentCompleted {
        PaymentCompleted {
            payment_id: PaymentId::new("pay_1"),
            order_id: OrderId::new("order_1"),
            user_id: UserId::new(user),
            amount: Money::from_cents(2000),
            currency: "USD".to_string(),
            payment_method: "card".to_string(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn redelivery_clears_both_times_without_error() {
        let service = Arc::new(CartService::new(InMemoryCartStore::new()));
        let handler = CartEventHandler::new(service.clone());
        let user = UserId::new("u1");
        service
            .add_item(&user, CartItem::priced("p1", "Mug", Money::from_cents(1000), 2))
            .await
            .unwrap();

        let event = payment_completed("u1");
        handler.handle_payment_completed(&event).await.unwrap();
        handler.handle_payment_completed(&event).await.unwrap();

        let cart = service.get_basket(&user).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount, Money::zero());
    }

    #[tokio::test]
    async fn other_users_are_untouched() {
        let service = Arc::new(CartService::new(InMemoryCartStore::new()));
        let handler = CartEventHandler::new(service.clone());
        let other = UserId::new("u2");
        service
            .add_product(&other, ProductId::new("p1"), 1)
            .await
            .unwrap();

        handler
            .handle_payment_completed(&payment_completed("u1"))
            .await
            .unwrap();

        assert_eq!(service.get_basket(&other).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_returned_for_redelivery() {
        let store = InMemoryCartStore::new();
        let service = Arc::new(CartService::new(store.clone()));
        let handler = CartEventHandler::new(service);
        store.set_unavailable(true);

        let err = handler
            .handle_payment_completed(&payment_completed("u1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("store unavailable"));
    }
}
