use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::{CatalogError, Result};

/// Page size used when a listing does not ask for one.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// A catalog entry. `stock` never goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: i64,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields supplied when creating a product.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub category: String,
}

impl NewProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::InvalidArgument("name must not be empty".into()));
        }
        if self.price.is_negative() {
            return Err(CatalogError::InvalidArgument(format!(
                "price must not be negative, got {}",
                self.price
            )));
        }
        if self.stock < 0 {
            return Err(CatalogError::InvalidArgument(format!(
                "stock must not be negative, got {}",
                self.stock
            )));
        }
        Ok(())
    }

    /// Builds the product row with a fresh `prod_` id.
    pub fn into_product(self) -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::generate(),
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            category: self.category,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Listing filter. Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

impl ListQuery {
    pub fn limit(&self) -> u32 {
        match self.limit {
            Some(0) | None => DEFAULT_LIST_LIMIT,
            Some(limit) => limit,
        }
    }

    /// Category filter; an empty string means no filter.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().filter(|c| !c.is_empty())
    }
}

/// Signed stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    Add,
    Subtract,
}

impl StockOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockOperation::Add => "add",
            StockOperation::Subtract => "subtract",
        }
    }

    /// Applies the operation to `product`'s stock.
    pub fn apply(&self, product: &Product, quantity: i64) -> Result<i64> {
        match self {
            StockOperation::Add => product.stock.checked_add(quantity).ok_or_else(|| {
                CatalogError::InvalidArgument(format!("stock overflow adding {quantity}"))
            }),
            StockOperation::Subtract => {
                let remaining = product.stock - quantity;
                if remaining < 0 {
                    return Err(CatalogError::InsufficientStock {
                        product_id: product.id.clone(),
                        available: product.stock,
                        requested: quantity,
                    });
                }
                Ok(remaining)
            }
        }
    }
}

impl std::fmt::Display for StockOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockOperation {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(StockOperation::Add),
            "subtract" => Ok(StockOperation::Subtract),
            other => Err(CatalogError::InvalidOperation(other.to_string())),
        }
    }
}
