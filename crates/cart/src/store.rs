//! Key-value storage for carts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{Cart, CartError, Result};

/// How long a cart survives without being written.
pub const CART_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Get/set access to whole carts, keyed by user.
///
/// Every `set` renews the entry's TTL. Expired entries read as absent.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>>;

    async fn set(&self, cart: &Cart, ttl: Duration) -> Result<()>;
}

#[async_trait]
impl<S: CartStore + ?Sized> CartStore for Arc<S> {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>> {
        (**self).get(user_id).await
    }

    async fn set(&self, cart: &Cart, ttl: Duration) -> Result<()> {
        (**self).set(cart, ttl).await
    }
}

struct Entry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-memory cart store.
///
/// Carts are held as serialized JSON, the same way a remote key-value store
/// would hold them, so reads always return an independent copy.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    entries: Arc<RwLock<HashMap<UserId, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail until switched back. Used by tests.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live carts.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self, user_id: &UserId) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CartError::Store {
                user_id: user_id.clone(),
                reason: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>> {
        self.check_available(user_id)?;

        let entries = self.entries.read().await;
        match entries.get(user_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(Some(serde_json::from_slice(&entry.payload)?))
            }
            _ => Ok(None),
        }
    }

    async fn set(&self, cart: &Cart, ttl: Duration) -> Result<()> {
        self.check_available(&cart.user_id)?;

        let payload = serde_json::to_vec(cart)?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > Instant::now());
        entries.insert(
            cart.user_id.clone(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_cart_reads_as_none() {
        let store = InMemoryCartStore::new();
        assert!(store.get(&UserId::new("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_returns_cart() {
        let store = InMemoryCartStore::new();
        let cart = Cart::empty(UserId::new("u1"));
        store.set(&cart, CART_TTL).await.unwrap();

        let loaded = store.get(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, cart.user_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = InMemoryCartStore::new();
        store
            .set(&Cart::empty(UserId::new("u1")), CART_TTL)
            .await
            .unwrap();

        tokio::time::advance(CART_TTL - Duration::from_secs(1)).await;
        assert!(store.get(&UserId::new("u1")).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&UserId::new("u1")).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn write_renews_ttl() {
        let store = InMemoryCartStore::new();
        let cart = Cart::empty(UserId::new("u1"));
        store.set(&cart, CART_TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(20 * 60 * 60)).await;
        store.set(&cart, CART_TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(20 * 60 * 60)).await;

        assert!(store.get(&UserId::new("u1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_fails_calls() {
        let store = InMemoryCartStore::new();
        store.set_unavailable(true);
        let err = store.get(&UserId::new("u1")).await.unwrap_err();
        assert!(matches!(err, CartError::Store { .. }));

        store.set_unavailable(false);
        assert!(store.get(&UserId::new("u1")).await.is_ok());
    }
}
