//! Invoice generation and voiding endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use tracing::instrument;

use super::json_body;
use crate::{
    dtos::{
        GenerateInvoicesRequest, GenerateInvoicesResponse, VoidInvoiceRequest, VoidInvoiceResponse,
    },
    error::BillingError,
    AppState,
};

/// POST /generate-monthly-invoices
#[instrument(skip(state, payload))]
pub async fn generate_monthly_invoices(
    State(state): State<AppState>,
    payload: Result<Json<GenerateInvoicesRequest>, JsonRejection>,
) -> Result<Json<GenerateInvoicesResponse>, BillingError> {
    let (org_id, period_start) = json_body(payload)?.parse()?;

    tracing::info!(org_id = %org_id, period_start = %period_start, "Generating monthly invoices");

    let outcome = state
        .billing
        .generate_monthly_invoices(org_id, period_start)
        .await?;

    Ok(Json(GenerateInvoicesResponse::from(outcome)))
}

/// POST /void-invoice
#[instrument(skip(state, payload))]
pub async fn void_invoice(
    State(state): State<AppState>,
    payload: Result<Json<VoidInvoiceRequest>, JsonRejection>,
) -> Result<Json<VoidInvoiceResponse>, BillingError> {
    let (invoice_id, org_id, reason, actor_user_id) = json_body(payload)?.parse()?;

    tracing::info!(
        invoice_id = %invoice_id,
        org_id = %org_id,
        actor_user_id = ?actor_user_id,
        "Voiding invoice"
    );

    let invoice_id = state
        .billing
        .void_invoice(invoice_id, org_id, &reason, actor_user_id)
        .await?;

    Ok(Json(VoidInvoiceResponse::voided(invoice_id)))
}
