use async_trait::async_trait;
use common::{Money, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::store::{ProductStore, ProductTransaction};
use crate::{CatalogError, ListQuery, Product, Result};

const PRODUCT_COLUMNS: &str =
    "id, name, description, price, stock, category, created_at, updated_at, deleted_at";

/// PostgreSQL-backed product store.
#[derive(Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price")?),
            stock: row.try_get("stock")?,
            category: row.try_get("category")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Product>> {
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE deleted_at IS NULL");
        let mut param_count = 0;

        if query.category().is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND category = ${param_count}"));
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut q = sqlx::query(&sql);
        if let Some(category) = query.category() {
            q = q.bind(category);
        }
        let rows = q
            .bind(i64::from(query.limit()))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn create(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock, category, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(product.stock)
        .bind(&product.category)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return CatalogError::AlreadyExists(product.id.clone());
            }
            CatalogError::Database(e)
        })?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn ProductTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ProductTransaction for PostgresTransaction {
    async fn get_for_update(&mut self, id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresProductStore::row_to_product).transpose()
    }

    async fn save(&mut self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, price = $4, stock = $5, category = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(product.stock)
        .bind(&product.category)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(product.id.clone()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
