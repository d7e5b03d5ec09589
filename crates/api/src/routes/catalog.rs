//! Catalog endpoints: product listing, lookup, creation and stock updates.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use catalog::{ListQuery, NewProduct, Product};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::CatalogApi;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ProductList {
    pub products: Vec<Product>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub quantity: i64,
    pub operation: String,
}

/// GET /v1/products: lists live products, newest first.
pub async fn list(
    State(catalog): State<Arc<CatalogApi>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ProductList>, ApiError> {
    let Query(query) = query?;
    let products = catalog.list_products(&query).await?;
    Ok(Json(ProductList {
        count: products.len(),
        products,
    }))
}

/// GET /v1/products/{id}
pub async fn get(
    State(catalog): State<Arc<CatalogApi>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let product = catalog.get_product(&ProductId::new(id)).await?;
    Ok(Json(product))
}

/// POST /v1/products
pub async fn create(
    State(catalog): State<Arc<CatalogApi>>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let Json(new) = payload?;
    let product = catalog.create_product(new).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// POST /v1/products/{id}/stock: `{"quantity": 3, "operation": "subtract"}`.
pub async fn update_stock(
    State(catalog): State<Arc<CatalogApi>>,
    Path(id): Path<String>,
    payload: Result<Json<StockRequest>, JsonRejection>,
) -> Result<Json<Product>, ApiError> {
    let Json(req) = payload?;
    let product = catalog
        .update_stock(&ProductId::new(id), req.quantity, &req.operation)
        .await?;
    Ok(Json(product))
}
