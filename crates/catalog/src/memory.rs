use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::store::{ProductStore, ProductTransaction};
use crate::{CatalogError, ListQuery, Product, Result};

struct Row {
    lock: Arc<Mutex<()>>,
    product: Product,
    /// Insertion sequence, breaks ties between equal `created_at`.
    seq: u64,
}

#[derive(Default)]
struct Table {
    rows: HashMap<ProductId, Row>,
    next_seq: u64,
}

/// In-memory product store.
///
/// Each row carries its own mutex. A transaction holds the mutex of every row
/// it read for update until it commits or rolls back, which gives the same
/// blocking behaviour as `SELECT ... FOR UPDATE`.
#[derive(Clone, Default)]
pub struct InMemoryProductStore {
    table: Arc<RwLock<Table>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored products, soft-deleted ones included.
    pub async fn product_count(&self) -> usize {
        self.table.read().await.rows.len()
    }

    /// Marks a product deleted. It stays stored but is no longer visible.
    pub async fn soft_delete(&self, id: &ProductId) -> Result<()> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(id.clone()))?;
        row.product.deleted_at = Some(chrono::Utc::now());
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .get(id)
            .map(|row| row.product.clone())
            .filter(|p| !p.is_deleted()))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Product>> {
        let table = self.table.read().await;
        let mut rows: Vec<&Row> = table
            .rows
            .values()
            .filter(|row| !row.product.is_deleted())
            .filter(|row| {
                query
                    .category()
                    .is_none_or(|category| row.product.category == category)
            })
            .collect();

        rows.sort_by(|a, b| {
            b.product
                .created_at
                .cmp(&a.product.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit() as usize)
            .map(|row| row.product.clone())
            .collect())
    }

    async fn create(&self, product: &Product) -> Result<()> {
        let mut table = self.table.write().await;
        if table.rows.contains_key(&product.id) {
            return Err(CatalogError::AlreadyExists(product.id.clone()));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(
            product.id.clone(),
            Row {
                lock: Arc::new(Mutex::new(())),
                product: product.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn ProductTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            table: self.table.clone(),
            locked: HashMap::new(),
            writes: HashMap::new(),
        }))
    }
}

struct InMemoryTransaction {
    table: Arc<RwLock<Table>>,
    locked: HashMap<ProductId, OwnedMutexGuard<()>>,
    writes: HashMap<ProductId, Product>,
}

#[async_trait]
impl ProductTransaction for InMemoryTransaction {
    async fn get_for_update(&mut self, id: &ProductId) -> Result<Option<Product>> {
        if let Some(pending) = self.writes.get(id) {
            return Ok(Some(pending.clone()));
        }

        if !self.locked.contains_key(id) {
            let lock = match self.table.read().await.rows.get(id) {
                Some(row) => row.lock.clone(),
                None => return Ok(None),
            };
            // The table guard is released before waiting on the row.
            let guard = lock.lock_owned().await;
            self.locked.insert(id.clone(), guard);
        }

        let table = self.table.read().await;
        Ok(table
            .rows
            .get(id)
            .map(|row| row.product.clone())
            .filter(|p| !p.is_deleted()))
    }

    async fn save(&mut self, product: &Product) -> Result<()> {
        if !self.locked.contains_key(&product.id) {
            return Err(CatalogError::Store(format!(
                "row {} was not read for update",
                product.id
            )));
        }
        self.writes.insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut table = this.table.write().await;
        for (id, product) in this.writes {
            match table.rows.get_mut(&id) {
                Some(row) => row.product = product,
                None => return Err(CatalogError::NotFound(id)),
            }
        }
        drop(table);
        drop(this.locked);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
