//! Domain models for rent-billing-service.

mod audit;
mod invoice;
mod lease;
mod member;
mod payment;

pub use audit::{AuditAction, AuditRecord};
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus, OpenLine, RENT_CHARGE_TYPE};
pub use lease::{Lease, LeaseStatus};
pub use member::OrgRole;
pub use payment::{AllocationLine, Payment, PaymentAllocation, PaymentStatus};

/// Error returned when a stored status/role string is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
