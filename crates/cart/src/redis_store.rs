//! Redis-backed cart store.

use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::store::CartStore;
use crate::{Cart, CartError, Result};

/// Carts as JSON under `basket:{user_id}`, written with `SET … EX`.
///
/// Redis drops the key once the TTL passes, so an abandoned cart reads as
/// absent. Every write renews the TTL.
#[derive(Clone)]
pub struct RedisCartStore {
    conn: ConnectionManager,
}

impl RedisCartStore {
    /// Connects to `redis_url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(redis_url: &str) -> std::result::Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("connected to Redis cart store");
        Ok(Self { conn })
    }

    fn key(user_id: &UserId) -> String {
        format!("basket:{user_id}")
    }

    /// Remaining lifetime of a stored cart, `None` when there is no cart.
    pub async fn ttl(&self, user_id: &UserId) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let seconds: i64 = conn
            .ttl(Self::key(user_id))
            .await
            .map_err(|e| store_error(user_id, e))?;
        // -2: no key, -1: no expiry
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }
}

fn store_error(user_id: &UserId, err: redis::RedisError) -> CartError {
    CartError::Store {
        user_id: user_id.clone(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl CartStore for RedisCartStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Cart>> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn
            .get(Self::key(user_id))
            .await
            .map_err(|e| store_error(user_id, e))?;

        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, cart: &Cart, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(cart)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::key(&cart.user_id), payload, ttl.as_secs().max(1))
            .await
            .map_err(|e| store_error(&cart.user_id, e))?;
        Ok(())
    }
}
