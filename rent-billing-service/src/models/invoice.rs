//! Invoice and invoice line models for rent-billing-service.

use super::UnknownVariant;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Charge type written on every line produced by the generator.
pub const RENT_CHARGE_TYPE: &str = "Rent";

/// Invoice status. `Void` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(InvoiceStatus::Open),
            "paid" => Ok(InvoiceStatus::Paid),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(UnknownVariant::new("invoice status", other)),
        }
    }
}

/// Monthly rent invoice for one lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    /// Fixed at creation.
    pub total_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Itemized charge within an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub org_id: Uuid,
    pub invoice_id: Uuid,
    pub charge_type: String,
    pub description: String,
    pub amount: Decimal,
    pub balance_amount: Decimal,
}

/// Allocation candidate: an open line joined with the parent invoice's due date.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub balance_amount: Decimal,
    pub due_date: NaiveDate,
}
