//! Lease model. Read-only to the billing core.

use super::UnknownVariant;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Pending,
    Ended,
    Terminated,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Pending => "pending",
            LeaseStatus::Ended => "ended",
            LeaseStatus::Terminated => "terminated",
        }
    }
}

impl FromStr for LeaseStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LeaseStatus::Active),
            "pending" => Ok(LeaseStatus::Pending),
            "ended" => Ok(LeaseStatus::Ended),
            "terminated" => Ok(LeaseStatus::Terminated),
            other => Err(UnknownVariant::new("lease status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub org_id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub rent_amount: Decimal,
    /// Day of month rent falls due (1-31), clamped to the period length.
    pub due_day: i32,
    pub status: LeaseStatus,
}
