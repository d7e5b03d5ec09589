//! Payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::PaymentId;
use payment::{Payment, PaymentRequest, Refund};
use serde::Serialize;

use crate::PaymentApi;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ProcessPaymentResponse {
    pub success: bool,
    pub payment: Payment,
}

/// POST /v1/payments: charges an order. Responds once the payment is
/// completed; the completion event is published before the response.
pub async fn process(
    State(payments): State<Arc<PaymentApi>>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProcessPaymentResponse>), ApiError> {
    let Json(request) = payload?;
    let payment = payments.process_payment(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProcessPaymentResponse {
            success: true,
            payment,
        }),
    ))
}

/// GET /v1/payments/{id}
pub async fn get(
    State(payments): State<Arc<PaymentApi>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment = payments.get_payment_status(&PaymentId::new(id)).await?;
    Ok(Json(payment))
}

/// POST /v1/payments/{id}/refund
pub async fn refund(
    State(payments): State<Arc<PaymentApi>>,
    Path(id): Path<String>,
) -> Result<Json<Refund>, ApiError> {
    let refund = payments.refund_payment(&PaymentId::new(id)).await?;
    Ok(Json(refund))
}
