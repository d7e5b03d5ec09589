//! Cart and cart item types with the pure mutation rules.

use chrono::{DateTime, Utc};
use common::{Money, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{CartError, Result};

/// Whether an item's name and unit price came from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pricing {
    /// Placeholder name and zero price; not yet looked up.
    #[default]
    Pending,
    /// Name and price supplied by a caller that knows them.
    Confirmed,
}

/// A line in a cart. Quantity is always positive while the item is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: u32,
    #[serde(default)]
    pub pricing: Pricing,
}

impl CartItem {
    /// An item whose name and price are known.
    pub fn priced(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            unit_price,
            quantity,
            pricing: Pricing::Confirmed,
        }
    }

    /// An item added with only a product id and quantity.
    pub fn pending(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        let product_id = product_id.into();
        Self {
            product_name: format!("Product {product_id}"),
            product_id,
            unit_price: Money::zero(),
            quantity,
            pricing: Pricing::Pending,
        }
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// A user's cart. `total_amount` is derived from the items after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// An empty cart for a user who has none yet.
    pub fn empty(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            items: Vec::new(),
            total_amount: Money::zero(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    /// Adds an item, accumulating quantity when the product is already present.
    ///
    /// A priced item overrides a pending placeholder for the same product.
    pub fn add_item(&mut self, item: CartItem) -> Result<()> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }

        match self
            .items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(item.quantity);
                if existing.pricing == Pricing::Pending && item.pricing == Pricing::Confirmed {
                    existing.product_name = item.product_name;
                    existing.unit_price = item.unit_price;
                    existing.pricing = Pricing::Confirmed;
                }
            }
            None => self.items.push(item),
        }

        self.recompute_total();
        Ok(())
    }

    /// Removes the product's line. Removing an absent product is a no-op.
    pub fn remove_item(&mut self, product_id: &ProductId) {
        self.items.retain(|i| &i.product_id != product_id);
        self.recompute_total();
    }

    /// Sets the product's quantity; zero or less removes the line.
    /// Updating an absent product is a no-op.
    pub fn update_quantity(&mut self, product_id: &ProductId, quantity: i64) {
        if quantity <= 0 {
            self.remove_item(product_id);
            return;
        }

        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        if let Some(item) = self.items.iter_mut().find(|i| &i.product_id == product_id) {
            item.quantity = quantity;
        }
        self.recompute_total();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_amount = Money::zero();
    }

    pub fn recompute_total(&mut self) {
        self.total_amount = self.items.iter().map(CartItem::line_total).sum();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
