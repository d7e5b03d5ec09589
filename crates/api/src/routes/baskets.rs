//! Basket endpoints. Every mutation answers with the whole cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use cart::{Cart, CartItem};
use common::{Money, ProductId, UserId};
use serde::Deserialize;

use crate::CartApi;
use crate::error::ApiError;

/// Body of `add`, `remove` and `update`.
///
/// `product_name` and `unit_price` are optional; when both are present the
/// line is added as priced, otherwise as a pending placeholder.
#[derive(Debug, Deserialize)]
pub struct BasketItemRequest {
    pub user_id: UserId,
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub unit_price: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct ClearBasketRequest {
    pub user_id: UserId,
}

/// GET /v1/baskets/{user_id}
pub async fn get(
    State(carts): State<Arc<CartApi>>,
    Path(user_id): Path<String>,
) -> Result<Json<Cart>, ApiError> {
    let cart = carts.get_basket(&UserId::new(user_id)).await?;
    Ok(Json(cart))
}

/// POST /v1/baskets/add
pub async fn add(
    State(carts): State<Arc<CartApi>>,
    payload: Result<Json<BasketItemRequest>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let Json(req) = payload?;
    let cart = match (req.product_name, req.unit_price) {
        (Some(name), Some(price)) => {
            let quantity = u32::try_from(req.quantity)
                .map_err(|_| cart::CartError::InvalidQuantity(req.quantity))?;
            carts
                .add_item(
                    &req.user_id,
                    CartItem::priced(req.product_id, name, price, quantity),
                )
                .await?
        }
        _ => {
            carts
                .add_product(&req.user_id, req.product_id, req.quantity)
                .await?
        }
    };
    Ok(Json(cart))
}

/// POST /v1/baskets/remove
pub async fn remove(
    State(carts): State<Arc<CartApi>>,
    payload: Result<Json<BasketItemRequest>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let Json(req) = payload?;
    let cart = carts.remove_item(&req.user_id, &req.product_id).await?;
    Ok(Json(cart))
}

/// POST /v1/baskets/update: a quantity of zero or less removes the line.
pub async fn update(
    State(carts): State<Arc<CartApi>>,
    payload: Result<Json<BasketItemRequest>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let Json(req) = payload?;
    let cart = carts
        .update_quantity(&req.user_id, &req.product_id, req.quantity)
        .await?;
    Ok(Json(cart))
}

/// POST /v1/baskets/clear
pub async fn clear(
    State(carts): State<Arc<CartApi>>,
    payload: Result<Json<ClearBasketRequest>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let Json(req) = payload?;
    let cart = carts.clear_basket(&req.user_id).await?;
    Ok(Json(cart))
}
