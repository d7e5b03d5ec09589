use async_trait::async_trait;
use common::ProductId;

use crate::{ListQuery, Product, Result};

/// Relational storage for products.
///
/// Plain reads never block on an open transaction and never see its
/// uncommitted writes.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Loads a product that has not been soft-deleted.
    async fn get(&self, id: &ProductId) -> Result<Option<Product>>;

    /// Lists live products, newest first.
    async fn list(&self, query: &ListQuery) -> Result<Vec<Product>>;

    async fn create(&self, product: &Product) -> Result<()>;

    /// Opens a transaction for read-lock-write cycles on stock.
    async fn begin(&self) -> Result<Box<dyn ProductTransaction>>;
}

/// An open store transaction.
///
/// Rows read with [`get_for_update`](Self::get_for_update) stay locked until
/// the transaction commits or rolls back. Dropping it without committing
/// discards its writes.
#[async_trait]
pub trait ProductTransaction: Send {
    async fn get_for_update(&mut self, id: &ProductId) -> Result<Option<Product>>;

    /// Writes a row previously locked by this transaction.
    async fn save(&mut self, product: &Product) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
impl<S: ProductStore + ?Sized> ProductStore for std::sync::Arc<S> {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        (**self).get(id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Product>> {
        (**self).list(query).await
    }

    async fn create(&self, product: &Product) -> Result<()> {
        (**self).create(product).await
    }

    async fn begin(&self) -> Result<Box<dyn ProductTransaction>> {
        (**self).begin().await
    }
}
