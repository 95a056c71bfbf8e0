use axum::{extract::rejection::JsonRejection, extract::State, Json};
use tracing::instrument;

use super::json_body;
use crate::{
    dtos::{AllocatePaymentRequest, AllocatePaymentResponse},
    error::BillingError,
    AppState,
};

/// POST /allocate-payment
#[instrument(skip(state, payload))]
pub async fn allocate_payment(
    State(state): State<AppState>,
    payload: Result<Json<AllocatePaymentRequest>, JsonRejection>,
) -> Result<Json<AllocatePaymentResponse>, BillingError> {
    let (payment_id, org_id, actor_user_id) = json_body(payload)?.parse()?;

    tracing::info!(payment_id = %payment_id, org_id = %org_id, "Allocating payment");

    let outcome = state
        .billing
        .allocate_payment(payment_id, org_id, actor_user_id)
        .await?;

    Ok(Json(AllocatePaymentResponse::from(outcome)))
}
