//! Request and response bodies for the billing endpoints.
//!
//! Identifiers arrive as strings; presence is checked with `validator`, then each value is
//! parsed. A malformed value is a validation error like a missing one.

use crate::error::{BillingError, BillingResult};
use crate::models::{AllocationLine, PaymentStatus};
use crate::services::{AllocationOutcome, GenerationOutcome};
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateInvoicesRequest {
    #[validate(
        required(message = "org_id and period_start are required"),
        length(min = 1, message = "org_id and period_start are required")
    )]
    pub org_id: Option<String>,

    /// ISO date, e.g. "2026-02-01". A full timestamp is accepted and truncated to its date.
    #[validate(
        required(message = "org_id and period_start are required"),
        length(min = 1, message = "org_id and period_start are required")
    )]
    pub period_start: Option<String>,
}

impl GenerateInvoicesRequest {
    pub fn parse(&self) -> BillingResult<(Uuid, NaiveDate)> {
        self.validate()?;
        Ok((
            parse_uuid("org_id", self.org_id.as_deref())?,
            parse_date("period_start", self.period_start.as_deref())?,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateInvoicesResponse {
    pub success: bool,
    pub invoices_created: usize,
    pub skipped: usize,
    /// Leases skipped because a write failed (included in `skipped`).
    pub failed: usize,
    pub invoice_ids: Vec<Uuid>,
}

impl From<GenerationOutcome> for GenerateInvoicesResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        Self {
            success: true,
            invoices_created: outcome.created.len(),
            skipped: outcome.skipped.len(),
            failed: outcome.failed.len(),
            invoice_ids: outcome.created,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AllocatePaymentRequest {
    #[validate(
        required(message = "payment_id and org_id are required"),
        length(min = 1, message = "payment_id and org_id are required")
    )]
    pub payment_id: Option<String>,

    #[validate(
        required(message = "payment_id and org_id are required"),
        length(min = 1, message = "payment_id and org_id are required")
    )]
    pub org_id: Option<String>,

    pub actor_user_id: Option<String>,
}

impl AllocatePaymentRequest {
    pub fn parse(&self) -> BillingResult<(Uuid, Uuid, Option<Uuid>)> {
        self.validate()?;
        Ok((
            parse_uuid("payment_id", self.payment_id.as_deref())?,
            parse_uuid("org_id", self.org_id.as_deref())?,
            parse_actor(self.actor_user_id.as_deref())?,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct AllocatePaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub allocations_made: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_allocated: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub remaining_unallocated: Decimal,
    pub payment_status: PaymentStatus,
    pub allocations: Vec<AllocationLine>,
}

impl From<AllocationOutcome> for AllocatePaymentResponse {
    fn from(outcome: AllocationOutcome) -> Self {
        Self {
            success: true,
            allocations_made: outcome.allocations_made(),
            message: outcome.message,
            total_allocated: outcome.total_allocated,
            remaining_unallocated: outcome.remaining_unallocated,
            payment_status: outcome.payment_status,
            allocations: outcome.allocations,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VoidInvoiceRequest {
    #[validate(
        required(message = "invoice_id, org_id, and reason are required"),
        length(min = 1, message = "invoice_id, org_id, and reason are required")
    )]
    pub invoice_id: Option<String>,

    #[validate(
        required(message = "invoice_id, org_id, and reason are required"),
        length(min = 1, message = "invoice_id, org_id, and reason are required")
    )]
    pub org_id: Option<String>,

    #[validate(
        required(message = "invoice_id, org_id, and reason are required"),
        length(min = 1, message = "invoice_id, org_id, and reason are required")
    )]
    pub reason: Option<String>,

    pub actor_user_id: Option<String>,
}

impl VoidInvoiceRequest {
    pub fn parse(&self) -> BillingResult<(Uuid, Uuid, String, Option<Uuid>)> {
        self.validate()?;
        Ok((
            parse_uuid("invoice_id", self.invoice_id.as_deref())?,
            parse_uuid("org_id", self.org_id.as_deref())?,
            self.reason.clone().unwrap_or_default(),
            parse_actor(self.actor_user_id.as_deref())?,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct VoidInvoiceResponse {
    pub success: bool,
    pub message: String,
    pub invoice_id: Uuid,
}

impl VoidInvoiceResponse {
    pub fn voided(invoice_id: Uuid) -> Self {
        Self {
            success: true,
            message: "Invoice voided successfully".to_string(),
            invoice_id,
        }
    }
}

fn parse_uuid(field: &str, value: Option<&str>) -> BillingResult<Uuid> {
    let value = value.unwrap_or_default().trim();
    Uuid::parse_str(value)
        .map_err(|_| BillingError::Validation(format!("{} must be a valid UUID", field)))
}

fn parse_date(field: &str, value: Option<&str>) -> BillingResult<NaiveDate> {
    let value = value.unwrap_or_default().trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| BillingError::Validation(format!("{} must be an ISO date", field)))
}

/// An absent or empty actor means a trusted caller.
fn parse_actor(value: Option<&str>) -> BillingResult<Option<Uuid>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_uuid("actor_user_id", Some(v)).map(Some),
    }
}
