//! Cart service: the RPC-facing operations over a [`CartStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{CART_TTL, CartStore};
use crate::{Cart, CartError, CartItem, Result};

/// Per-user mutual exclusion for read-modify-write cycles.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(user_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Shopping cart operations.
///
/// Every mutation reads the whole cart, applies the change, recomputes the
/// total and writes the whole cart back with a renewed TTL. Mutations for the
/// same user are serialized, so concurrent adds never lose each other.
pub struct CartService<S: CartStore> {
    store: S,
    ttl: Duration,
    locks: UserLocks,
}

impl<S: CartStore> CartService<S> {
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, CART_TTL)
    }

    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: UserLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the user's cart, or a fresh empty one. Reading never writes.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_basket(&self, user_id: &UserId) -> Result<Cart> {
        Ok(self
            .store
            .get(user_id)
            .await?
            .unwrap_or_else(|| Cart::empty(user_id.clone())))
    }

    /// Adds an item; an existing line for the same product accumulates.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, product_id = %item.product_id, quantity = item.quantity))]
    pub async fn add_item(&self, user_id: &UserId, item: CartItem) -> Result<Cart> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }
        self.mutate(user_id, "add_item", |cart| cart.add_item(item))
            .await
    }

    /// Adds a product known only by id. The line is priced later.
    pub async fn add_product(
        &self,
        user_id: &UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart> {
        let quantity = match u32::try_from(quantity) {
            Ok(q) if q > 0 => q,
            _ => return Err(CartError::InvalidQuantity(quantity)),
        };
        self.add_item(user_id, CartItem::pending(product_id, quantity))
            .await
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id, product_id = %product_id))]
    pub async fn remove_item(&self, user_id: &UserId, product_id: &ProductId) -> Result<Cart> {
        self.mutate(user_id, "remove_item", |cart| {
            cart.remove_item(product_id);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id, product_id = %product_id))]
    pub async fn update_quantity(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Cart> {
        self.mutate(user_id, "update_quantity", |cart| {
            cart.update_quantity(product_id, quantity);
            Ok(())
        })
        .await
    }

    /// Empties the cart. Clearing an empty or missing cart still writes it.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn clear_basket(&self, user_id: &UserId) -> Result<Cart> {
        self.mutate(user_id, "clear", |cart| {
            cart.clear();
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, user_id: &UserId, operation: &'static str, apply: F) -> Result<Cart>
    where
        F: FnOnce(&mut Cart) -> Result<()>,
    {
        let _guard = self.locks.acquire(user_id).await;

        let mut cart = self.get_basket(user_id).await?;
        apply(&mut cart)?;
        cart.recompute_total();
        cart.touch();
        self.store.set(&cart, self.ttl).await?;

        metrics::counter!("cart_operations_total", "operation" => operation).increment(1);
        tracing::debug!(
            items = cart.items.len(),
            total = %cart.total_amount,
            "cart written"
        );
        Ok(cart)
    }
}
