//! Product catalog.
//!
//! Stock is only ever changed through a store transaction: the row is read
//! under a lock, the signed adjustment is validated, then written and
//! committed. A failure at any step rolls the transaction back.

pub mod error;
pub mod handler;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::{CatalogError, Result};
pub use handler::{
    APPLIED_PAYMENTS_CAPACITY, CatalogEventHandler, OrderLine, OrderLines, UnavailableOrderLines,
};
pub use memory::InMemoryProductStore;
pub use model::{DEFAULT_LIST_LIMIT, ListQuery, NewProduct, Product, StockOperation};
pub use postgres::PostgresProductStore;
pub use service::CatalogService;
pub use store::{ProductStore, ProductTransaction};
