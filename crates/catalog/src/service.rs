//! Catalog operations exposed at the RPC boundary.

use chrono::Utc;
use common::ProductId;

use crate::handler::OrderLine;
use crate::store::{ProductStore, ProductTransaction};
use crate::{CatalogError, ListQuery, NewProduct, Product, Result, StockOperation};

/// Product catalog service.
pub struct CatalogService<S: ProductStore> {
    store: S,
}

impl<S: ProductStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: &ProductId) -> Result<Product> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.clone()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_products(&self, query: &ListQuery) -> Result<Vec<Product>> {
        self.store.list(query).await
    }

    #[tracing::instrument(skip_all, fields(name = %new.name))]
    pub async fn create_product(&self, new: NewProduct) -> Result<Product> {
        new.validate()?;
        let product = new.into_product();
        self.store.create(&product).await?;
        tracing::info!(product_id = %product.id, stock = product.stock, "product created");
        Ok(product)
    }

    /// Applies a signed stock adjustment named by `operation`
    /// (`"add"` or `"subtract"`).
    pub async fn update_stock(
        &self,
        id: &ProductId,
        quantity: i64,
        operation: &str,
    ) -> Result<Product> {
        let operation: StockOperation = operation.parse()?;
        self.adjust_stock(id, quantity, operation).await
    }

    /// Begin, lock the row, compute, validate, write, commit. Any failure
    /// rolls the transaction back and leaves stock unchanged.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn adjust_stock(
        &self,
        id: &ProductId,
        quantity: i64,
        operation: StockOperation,
    ) -> Result<Product> {
        check_quantity(quantity)?;

        let mut tx = self.store.begin().await?;
        match apply_line(tx.as_mut(), id, quantity, operation).await {
            Ok(product) => {
                tx.commit().await?;
                record_stock_update(operation, "ok");
                tracing::info!(stock = product.stock, "stock updated");
                Ok(product)
            }
            Err(e) => {
                rollback(tx).await;
                record_stock_update(operation, "rejected");
                Err(e)
            }
        }
    }

    pub async fn decrease_stock(&self, id: &ProductId, quantity: i64) -> Result<Product> {
        self.adjust_stock(id, quantity, StockOperation::Subtract)
            .await
    }

    /// Subtracts every line in one transaction. Either all lines apply or
    /// none do. Rows are locked in product id order.
    #[tracing::instrument(skip_all, fields(lines = lines.len()))]
    pub async fn decrement_for_order_lines(&self, lines: &[OrderLine]) -> Result<Vec<Product>> {
        for line in lines {
            check_quantity(line.quantity)?;
        }

        let mut ordered: Vec<&OrderLine> = lines.iter().collect();
        ordered.sort_by(|a, b| a.product_id.cmp(&b.product_id));

        let mut tx = self.store.begin().await?;
        let mut updated: Vec<Product> = Vec::with_capacity(ordered.len());
        for line in ordered {
            match apply_line(
                tx.as_mut(),
                &line.product_id,
                line.quantity,
                StockOperation::Subtract,
            )
            .await
            {
                Ok(product) => {
                    updated.retain(|p| p.id != product.id);
                    updated.push(product);
                }
                Err(e) => {
                    rollback(tx).await;
                    record_stock_update(StockOperation::Subtract, "rejected");
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        record_stock_update(StockOperation::Subtract, "ok");
        Ok(updated)
    }
}

fn check_quantity(quantity: i64) -> Result<()> {
    if quantity < 0 {
        return Err(CatalogError::InvalidArgument(format!(
            "quantity must not be negative, got {quantity}"
        )));
    }
    Ok(())
}

async fn apply_line(
    tx: &mut dyn ProductTransaction,
    id: &ProductId,
    quantity: i64,
    operation: StockOperation,
) -> Result<Product> {
    let mut product = tx
        .get_for_update(id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(id.clone()))?;

    product.stock = operation.apply(&product, quantity)?;
    product.updated_at = Utc::now();
    tx.save(&product).await?;
    Ok(product)
}

async fn rollback(tx: Box<dyn ProductTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

fn record_stock_update(operation: StockOperation, outcome: &'static str) {
    metrics::counter!(
        "catalog_stock_updates_total",
        "operation" => operation.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryProductStore;
    use common::Money;
    use std::sync::Arc;

    async fn service_with(stock: i64) -> (CatalogService<InMemoryProductStore>, ProductId) {
        let service = CatalogService::new(InMemoryProductStore::new());
        let product = service
            .create_product(NewProduct {
                name: "Lamp".into(),
                description: "Desk lamp".into(),
                price: Money::from_cents(2500),
                stock,
                category: "home".into(),
            })
            .await
            .unwrap();
        (service, product.id)
    }

    #[tokio::test]
    async fn get_missing_product_is_not_found() {
        let service = CatalogService::new(InMemoryProductStore::new());
        let err = service
            .get_product(&ProductId::new("prod_missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn add_then_subtract() {
        let (service, id) = service_with(5).await;

        let product = service.update_stock(&id, 10, "add").await.unwrap();
        assert_eq!(product.stock, 15);

        let product = service.update_stock(&id, 15, "subtract").await.unwrap();
        assert_eq!(product.stock, 0);
        assert_eq!(service.get_product(&id).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_stock_unchanged() {
        let (service, id) = service_with(5).await;

        let err = service.update_stock(&id, 10, "subtract").await.unwrap_err();
        assert!(matches!(err, CatalogError::InsufficientStock { .. }));
        assert_eq!(service.get_product(&id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn unknown_operation_and_negative_quantity_are_rejected() {
        let (service, id) = service_with(5).await;

        assert!(matches!(
            service.update_stock(&id, 1, "multiply").await,
            Err(CatalogError::InvalidOperation(_))
        ));
        assert!(matches!(
            service.update_stock(&id, -1, "add").await,
            Err(CatalogError::InvalidArgument(_))
        ));
        assert_eq!(service.get_product(&id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn stock_update_on_missing_product_is_not_found() {
        let service = CatalogService::new(InMemoryProductStore::new());
        assert!(matches!(
            service
                .update_stock(&ProductId::new("prod_missing"), 1, "add")
                .await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn order_lines_apply_all_or_nothing() {
        let service = CatalogService::new(InMemoryProductStore::new());
        let mut ids = Vec::new();
        for stock in [5, 1] {
            let product = service
                .create_product(NewProduct {
                    name: format!("item-{stock}"),
                    description: String::new(),
                    price: Money::from_cents(100),
                    stock,
                    category: String::new(),
                })
                .await
                .unwrap();
            ids.push(product.id);
        }

        let too_many = [
            OrderLine::new(ids[0].clone(), 2),
            OrderLine::new(ids[1].clone(), 3),
        ];
        let err = service.decrement_for_order_lines(&too_many).await.unwrap_err();
        assert!(matches!(err, CatalogError::InsufficientStock { .. }));
        assert_eq!(service.get_product(&ids[0]).await.unwrap().stock, 5);
        assert_eq!(service.get_product(&ids[1]).await.unwrap().stock, 1);

        let fits = [
            OrderLine::new(ids[0].clone(), 2),
            OrderLine::new(ids[1].clone(), 1),
            OrderLine::new(ids[0].clone(), 1),
        ];
        let updated = service.decrement_for_order_lines(&fits).await.unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(service.get_product(&ids[0]).await.unwrap().stock, 2);
        assert_eq!(service.get_product(&ids[1]).await.unwrap().stock, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subtracts_never_oversell() {
        let (service, id) = service_with(10).await;
        let service = Arc::new(service);

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let service = service.clone();
                let id = id.clone();
                tokio::spawn(async move { service.decrease_stock(&id, 1).await.is_ok() })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(service.get_product(&id).await.unwrap().stock, 0);
    }
}
