//! Shared types for the storefront services.
//!
//! - string identifiers for users, products, payments and orders
//! - [`Money`] as integer cents
//! - [`Status`] and [`Code`], the error shape every service returns at its
//!   RPC boundary

pub mod money;
pub mod status;
pub mod types;

pub use money::{Money, ParseMoneyError};
pub use status::{Code, Status};
pub use types::{OrderId, PaymentId, ProductId, UserId};
