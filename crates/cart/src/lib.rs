//! Shopping cart aggregate.
//!
//! A cart is read whole, mutated, re-totalled and written back whole. Writes
//! for one user are serialized by [`CartService`]; the store only has to
//! provide get/set with a freshness TTL. The cart also reacts to
//! `PaymentCompleted` by clearing itself, see [`CartEventHandler`].

pub mod error;
pub mod handler;
pub mod model;
pub mod redis_store;
pub mod service;
pub mod store;

pub use error::{CartError, Result};
pub use handler::CartEventHandler;
pub use model::{Cart, CartItem, Pricing};
pub use redis_store::RedisCartStore;
pub use service::CartService;
pub use store::{CART_TTL, CartStore, InMemoryCartStore};
