//! Seams to the collaborators the billing core depends on.
//!
//! The store is expected to make every single-row write atomic. Multi-row writes within one
//! operation are issued as an ordered sequence of independent calls.

use crate::models::{
    AuditRecord, Invoice, InvoiceLine, InvoiceStatus, Lease, OpenLine, Payment, PaymentAllocation,
    PaymentStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Result of an invoice insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An invoice already exists for the same lease and period.
    Duplicate,
}

/// Invoice balance and status after a payment was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceBalance {
    pub balance_amount: Decimal,
    pub status: InvoiceStatus,
}

/// Relational store for leases, invoices, lines, payments and allocations.
///
/// Every method is scoped by `org_id`; rows outside the org are invisible.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn list_active_leases(&self, org_id: Uuid) -> anyhow::Result<Vec<Lease>>;

    /// Id of the invoice (voided or not) for `lease_id` starting at `period_start`, if any.
    async fn find_invoice_for_period(
        &self,
        org_id: Uuid,
        lease_id: Uuid,
        period_start: NaiveDate,
    ) -> anyhow::Result<Option<Uuid>>;

    async fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<InsertOutcome>;

    async fn insert_invoice_line(&self, line: &InvoiceLine) -> anyhow::Result<()>;

    /// Deletes an invoice. Deleting a missing invoice is not an error.
    async fn delete_invoice(&self, org_id: Uuid, invoice_id: Uuid) -> anyhow::Result<bool>;

    async fn get_invoice(&self, org_id: Uuid, invoice_id: Uuid)
        -> anyhow::Result<Option<Invoice>>;

    async fn get_payment(&self, org_id: Uuid, payment_id: Uuid)
        -> anyhow::Result<Option<Payment>>;

    async fn sum_payment_allocations(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
    ) -> anyhow::Result<Decimal>;

    async fn sum_invoice_allocations(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
    ) -> anyhow::Result<Decimal>;

    /// Lines with a positive balance on the tenant's open invoices, oldest due date first.
    /// Ties break on invoice id, then line id.
    async fn open_lines_for_tenant(
        &self,
        org_id: Uuid,
        tenant_id: Uuid,
    ) -> anyhow::Result<Vec<OpenLine>>;

    async fn insert_allocation(&self, allocation: &PaymentAllocation) -> anyhow::Result<()>;

    /// Atomically lowers a line balance by `amount`, floored at zero. Returns the new balance.
    async fn decrement_line_balance(
        &self,
        org_id: Uuid,
        line_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Decimal>;

    /// Atomically lowers an invoice balance by `amount` (floored at zero) and sets the status
    /// to `paid` or `open` from the result. Void invoices are left untouched and yield `None`.
    async fn apply_invoice_payment(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<InvoiceBalance>>;

    async fn update_payment_status(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Flips a non-void invoice to void. Returns false if it was already void or missing.
    async fn void_invoice(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Membership lookup: the member's role string within an org.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<String>>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> Uuid;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
