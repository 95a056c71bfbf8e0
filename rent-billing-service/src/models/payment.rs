//! Payment and payment allocation models for rent-billing-service.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Payment allocation status, derived from allocated total vs payment amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentStatus {
    Unallocated,
    PartiallyAllocated,
    Allocated,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unallocated => "unallocated",
            PaymentStatus::PartiallyAllocated => "partiallyAllocated",
            PaymentStatus::Allocated => "allocated",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unallocated" => Ok(PaymentStatus::Unallocated),
            "partiallyAllocated" => Ok(PaymentStatus::PartiallyAllocated),
            "allocated" => Ok(PaymentStatus::Allocated),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// Incoming tenant payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub org_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of part of a payment applied to one invoice line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub invoice_line_id: Uuid,
    pub amount_allocated: Decimal,
}

/// One allocation made during an allocator pass, as reported to callers and the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub invoice_id: Uuid,
    pub invoice_line_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}
