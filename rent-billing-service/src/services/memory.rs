//! In-memory billing store for local runs and tests.
//!
//! Implements the same contracts as the PostgreSQL store, including atomic balance
//! decrements and the (lease, period) uniqueness of invoices. Fault hooks let callers
//! make individual writes fail to exercise skip-and-continue paths.

use crate::models::{
    AuditRecord, Invoice, InvoiceLine, InvoiceStatus, Lease, LeaseStatus, OpenLine, Payment,
    PaymentAllocation, PaymentStatus,
};
use crate::services::ledger::{floor_at_zero, invoice_status_for_balance};
use crate::services::ports::{
    AuditSink, BillingStore, InsertOutcome, InvoiceBalance, RoleDirectory,
};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    leases: HashMap<Uuid, Lease>,
    invoices: HashMap<Uuid, Invoice>,
    lines: HashMap<Uuid, InvoiceLine>,
    payments: HashMap<Uuid, Payment>,
    allocations: Vec<PaymentAllocation>,
    members: HashMap<(Uuid, Uuid), String>,
    audit: Vec<AuditRecord>,
}

#[derive(Default)]
struct Faults {
    lease_fetch: bool,
    line_fetch: bool,
    line_inserts: usize,
    allocation_lines: HashSet<Uuid>,
    payment_status_updates: bool,
    audit_appends: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    pub fn put_lease(&self, lease: Lease) {
        self.tables().leases.insert(lease.id, lease);
    }

    pub fn put_payment(&self, payment: Payment) {
        self.tables().payments.insert(payment.id, payment);
    }

    pub fn put_invoice(&self, invoice: Invoice) {
        self.tables().invoices.insert(invoice.id, invoice);
    }

    pub fn put_line(&self, line: InvoiceLine) {
        self.tables().lines.insert(line.id, line);
    }

    pub fn put_allocation(&self, allocation: PaymentAllocation) {
        self.tables().allocations.push(allocation);
    }

    pub fn put_member(&self, org_id: Uuid, user_id: Uuid, role: &str) {
        self.tables()
            .members
            .insert((org_id, user_id), role.to_string());
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    pub fn fail_lease_fetch(&self) {
        self.faults().lease_fetch = true;
    }

    pub fn fail_line_fetch(&self) {
        self.faults().line_fetch = true;
    }

    /// Makes the next `count` invoice line inserts fail.
    pub fn fail_next_line_inserts(&self, count: usize) {
        self.faults().line_inserts = count;
    }

    pub fn fail_allocations_for_line(&self, line_id: Uuid) {
        self.faults().allocation_lines.insert(line_id);
    }

    pub fn fail_payment_status_updates(&self) {
        self.faults().payment_status_updates = true;
    }

    pub fn fail_audit_appends(&self) {
        self.faults().audit_appends = true;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        self.tables().invoices.get(&invoice_id).cloned()
    }

    pub fn invoices_for_org(&self, org_id: Uuid) -> Vec<Invoice> {
        let mut invoices: Vec<Invoice> = self
            .tables()
            .invoices
            .values()
            .filter(|i| i.org_id == org_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| (i.period_start, i.lease_id));
        invoices
    }

    pub fn lines_for_invoice(&self, invoice_id: Uuid) -> Vec<InvoiceLine> {
        self.tables()
            .lines
            .values()
            .filter(|l| l.invoice_id == invoice_id)
            .cloned()
            .collect()
    }

    pub fn line(&self, line_id: Uuid) -> Option<InvoiceLine> {
        self.tables().lines.get(&line_id).cloned()
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<Payment> {
        self.tables().payments.get(&payment_id).cloned()
    }

    pub fn allocations_for_payment(&self, payment_id: Uuid) -> Vec<PaymentAllocation> {
        self.tables()
            .allocations
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.tables().audit.clone()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn list_active_leases(&self, org_id: Uuid) -> anyhow::Result<Vec<Lease>> {
        if self.faults().lease_fetch {
            bail!("lease fetch unavailable");
        }
        let mut leases: Vec<Lease> = self
            .tables()
            .leases
            .values()
            .filter(|l| l.org_id == org_id && l.status == LeaseStatus::Active)
            .cloned()
            .collect();
        leases.sort_by_key(|l| l.id);
        Ok(leases)
    }

    async fn find_invoice_for_period(
        &self,
        org_id: Uuid,
        lease_id: Uuid,
        period_start: NaiveDate,
    ) -> anyhow::Result<Option<Uuid>> {
        Ok(self
            .tables()
            .invoices
            .values()
            .find(|i| {
                i.org_id == org_id
                    && i.lease_id == lease_id
                    && i.period_start == period_start
            })
            .map(|i| i.id))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<InsertOutcome> {
        let mut tables = self.tables();
        let duplicate = tables
            .invoices
            .values()
            .any(|i| i.lease_id == invoice.lease_id && i.period_start == invoice.period_start);
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn insert_invoice_line(&self, line: &InvoiceLine) -> anyhow::Result<()> {
        {
            let mut faults = self.faults();
            if faults.line_inserts > 0 {
                faults.line_inserts -= 1;
                bail!("invoice line insert rejected");
            }
        }
        let mut tables = self.tables();
        if !tables.invoices.contains_key(&line.invoice_id) {
            bail!("invoice {} does not exist", line.invoice_id);
        }
        tables.lines.insert(line.id, line.clone());
        Ok(())
    }

    async fn delete_invoice(&self, org_id: Uuid, invoice_id: Uuid) -> anyhow::Result<bool> {
        let mut tables = self.tables();
        let owned = tables
            .invoices
            .get(&invoice_id)
            .is_some_and(|i| i.org_id == org_id);
        if !owned {
            return Ok(false);
        }
        tables.invoices.remove(&invoice_id);
        tables.lines.retain(|_, l| l.invoice_id != invoice_id);
        Ok(true)
    }

    async fn get_invoice(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
    ) -> anyhow::Result<Option<Invoice>> {
        Ok(self
            .tables()
            .invoices
            .get(&invoice_id)
            .filter(|i| i.org_id == org_id)
            .cloned())
    }

    async fn get_payment(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
    ) -> anyhow::Result<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .get(&payment_id)
            .filter(|p| p.org_id == org_id)
            .cloned())
    }

    async fn sum_payment_allocations(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
    ) -> anyhow::Result<Decimal> {
        Ok(self
            .tables()
            .allocations
            .iter()
            .filter(|a| a.org_id == org_id && a.payment_id == payment_id)
            .map(|a| a.amount_allocated)
            .sum())
    }

    async fn sum_invoice_allocations(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
    ) -> anyhow::Result<Decimal> {
        Ok(self
            .tables()
            .allocations
            .iter()
            .filter(|a| a.org_id == org_id && a.invoice_id == invoice_id)
            .map(|a| a.amount_allocated)
            .sum())
    }

    async fn open_lines_for_tenant(
        &self,
        org_id: Uuid,
        tenant_id: Uuid,
    ) -> anyhow::Result<Vec<OpenLine>> {
        if self.faults().line_fetch {
            bail!("invoice line fetch unavailable");
        }
        let tables = self.tables();
        let mut lines: Vec<OpenLine> = tables
            .lines
            .values()
            .filter(|l| l.org_id == org_id && l.balance_amount > Decimal::ZERO)
            .filter_map(|l| {
                let invoice = tables.invoices.get(&l.invoice_id)?;
                let eligible = invoice.org_id == org_id
                    && invoice.tenant_id == tenant_id
                    && invoice.status == InvoiceStatus::Open;
                eligible.then(|| OpenLine {
                    line_id: l.id,
                    invoice_id: invoice.id,
                    balance_amount: l.balance_amount,
                    due_date: invoice.due_date,
                })
            })
            .collect();
        lines.sort_by_key(|l| (l.due_date, l.invoice_id, l.line_id));
        Ok(lines)
    }

    async fn insert_allocation(&self, allocation: &PaymentAllocation) -> anyhow::Result<()> {
        if self
            .faults()
            .allocation_lines
            .contains(&allocation.invoice_line_id)
        {
            bail!(
                "allocation insert rejected for line {}",
                allocation.invoice_line_id
            );
        }
        if allocation.amount_allocated <= Decimal::ZERO {
            bail!("amount_allocated must be positive");
        }
        self.tables().allocations.push(allocation.clone());
        Ok(())
    }

    async fn decrement_line_balance(
        &self,
        org_id: Uuid,
        line_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Decimal> {
        let mut tables = self.tables();
        let line = tables
            .lines
            .get_mut(&line_id)
            .filter(|l| l.org_id == org_id)
            .ok_or_else(|| anyhow!("invoice line {} not found", line_id))?;
        line.balance_amount = floor_at_zero(line.balance_amount - amount);
        Ok(line.balance_amount)
    }

    async fn apply_invoice_payment(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<InvoiceBalance>> {
        let mut tables = self.tables();
        let Some(invoice) = tables
            .invoices
            .get_mut(&invoice_id)
            .filter(|i| i.org_id == org_id && i.status != InvoiceStatus::Void)
        else {
            return Ok(None);
        };
        let remaining = invoice.balance_amount - amount;
        invoice.balance_amount = floor_at_zero(remaining);
        invoice.status = invoice_status_for_balance(remaining);
        invoice.updated_at = now;
        Ok(Some(InvoiceBalance {
            balance_amount: invoice.balance_amount,
            status: invoice.status,
        }))
    }

    async fn update_payment_status(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if self.faults().payment_status_updates {
            bail!("payment status update rejected");
        }
        let mut tables = self.tables();
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .filter(|p| p.org_id == org_id)
            .ok_or_else(|| anyhow!("payment {} not found", payment_id))?;
        payment.status = status;
        payment.updated_at = now;
        Ok(())
    }

    async fn void_invoice(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables();
        match tables
            .invoices
            .get_mut(&invoice_id)
            .filter(|i| i.org_id == org_id)
        {
            Some(invoice) if invoice.status != InvoiceStatus::Void => {
                invoice.status = InvoiceStatus::Void;
                invoice.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for InMemoryStore {
    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<String>> {
        Ok(self.tables().members.get(&(org_id, user_id)).cloned())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        if self.faults().audit_appends {
            bail!("audit log unavailable");
        }
        self.tables().audit.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RENT_CHARGE_TYPE;
    use chrono::Datelike;

    fn invoice(org_id: Uuid, tenant_id: Uuid, due: NaiveDate, total: i64) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            org_id,
            lease_id: Uuid::new_v4(),
            tenant_id,
            unit_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            period_start: due.with_day0(0).unwrap(),
            period_end: due,
            due_date: due,
            total_amount: Decimal::from(total),
            balance_amount: Decimal::from(total),
            status: InvoiceStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    fn line_for(invoice: &Invoice) -> InvoiceLine {
        InvoiceLine {
            id: Uuid::new_v4(),
            org_id: invoice.org_id,
            invoice_id: invoice.id,
            charge_type: RENT_CHARGE_TYPE.to_string(),
            description: "Rent".to_string(),
            amount: invoice.total_amount,
            balance_amount: invoice.balance_amount,
        }
    }

    #[tokio::test]
    async fn open_lines_sorted_by_due_date_then_ids() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let late = invoice(org, tenant, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(), 100);
        let early = invoice(org, tenant, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), 100);
        let other_tenant = invoice(
            org,
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            100,
        );
        for inv in [&late, &early, &other_tenant] {
            store.put_invoice(inv.clone());
            store.put_line(line_for(inv));
        }

        let lines = store.open_lines_for_tenant(org, tenant).await.unwrap();
        let invoice_ids: Vec<Uuid> = lines.iter().map(|l| l.invoice_id).collect();
        assert_eq!(invoice_ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn other_org_rows_are_invisible() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let inv = invoice(org, Uuid::new_v4(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), 50);
        store.put_invoice(inv.clone());

        let foreign = Uuid::new_v4();
        assert!(store.get_invoice(foreign, inv.id).await.unwrap().is_none());
        assert!(!store.void_invoice(foreign, inv.id, Utc::now()).await.unwrap());
        assert!(!store.delete_invoice(foreign, inv.id).await.unwrap());
        assert_eq!(store.invoice(inv.id).unwrap().status, InvoiceStatus::Open);
    }

    #[tokio::test]
    async fn duplicate_invoice_is_rejected_even_when_voided() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let first = invoice(org, Uuid::new_v4(), NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(), 50);
        let mut second = first.clone();
        second.id = Uuid::new_v4();

        assert_eq!(
            store.insert_invoice(&first).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_invoice(&second).await.unwrap(),
            InsertOutcome::Duplicate
        );

        assert!(store.void_invoice(org, first.id, Utc::now()).await.unwrap());
        assert_eq!(
            store.insert_invoice(&second).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            store
                .find_invoice_for_period(org, first.lease_id, first.period_start)
                .await
                .unwrap(),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn invoice_payment_floors_balance_and_marks_paid() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let inv = invoice(org, Uuid::new_v4(), NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(), 50);
        store.put_invoice(inv.clone());

        let balance = store
            .apply_invoice_payment(org, inv.id, Decimal::from(80), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.balance_amount, Decimal::ZERO);
        assert_eq!(balance.status, InvoiceStatus::Paid);
    }
}
