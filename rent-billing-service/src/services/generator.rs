//! Monthly rent invoice generation.

use crate::error::{BillingError, BillingResult};
use crate::models::{AuditAction, Invoice, InvoiceLine, InvoiceStatus, Lease, RENT_CHARGE_TYPE};
use crate::services::billing::{BillingService, GenerationOutcome};
use crate::services::ledger::BillingPeriod;
use crate::services::metrics::{INVOICES_GENERATED_TOTAL, ITEM_FAILURES_TOTAL, LEASES_SKIPPED_TOTAL};
use crate::services::ports::InsertOutcome;
use anyhow::Context;
use chrono::NaiveDate;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How a single lease was handled.
enum LeaseResult {
    Created(Uuid),
    AlreadyInvoiced,
    Failed,
}

impl BillingService {
    /// Creates one open rent invoice (with one rent line) per active lease in the org that
    /// has no invoice for the period yet, voided ones included. A failure on one lease never stops the others.
    #[instrument(skip(self), fields(org_id = %org_id, period_start = %period_start))]
    pub async fn generate_monthly_invoices(
        &self,
        org_id: Uuid,
        period_start: NaiveDate,
    ) -> BillingResult<GenerationOutcome> {
        let period = BillingPeriod::containing(period_start);
        let _guard = self
            .locks
            .acquire(format!("generate:{}:{}", org_id, period.start))
            .await;

        let leases = self
            .store
            .list_active_leases(org_id)
            .await
            .context("Failed to fetch leases")
            .map_err(BillingError::Dependency)?;

        let mut outcome = GenerationOutcome::default();

        for lease in &leases {
            match self.invoice_lease(org_id, lease, &period).await {
                LeaseResult::Created(invoice_id) => outcome.created.push(invoice_id),
                LeaseResult::AlreadyInvoiced => {
                    LEASES_SKIPPED_TOTAL.with_label_values(&["existing"]).inc();
                    outcome.skipped.push(lease.id);
                }
                LeaseResult::Failed => {
                    LEASES_SKIPPED_TOTAL.with_label_values(&["failed"]).inc();
                    outcome.skipped.push(lease.id);
                    outcome.failed.push(lease.id);
                }
            }
        }

        info!(
            leases = leases.len(),
            created = outcome.created.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Invoice generation completed"
        );

        Ok(outcome)
    }

    #[instrument(skip(self, lease, period), fields(lease_id = %lease.id))]
    async fn invoice_lease(&self, org_id: Uuid, lease: &Lease, period: &BillingPeriod) -> LeaseResult {
        match self
            .store
            .find_invoice_for_period(org_id, lease.id, period.start)
            .await
        {
            Ok(Some(_)) => return LeaseResult::AlreadyInvoiced,
            Ok(None) => {}
            Err(e) => {
                ITEM_FAILURES_TOTAL.with_label_values(&["invoice_lookup"]).inc();
                error!(error = %e, lease_id = %lease.id, "Failed to check existing invoice");
                return LeaseResult::Failed;
            }
        }

        let now = self.clock.now();
        let invoice = Invoice {
            id: self.ids.new_id(),
            org_id,
            lease_id: lease.id,
            tenant_id: lease.tenant_id,
            unit_id: lease.unit_id,
            property_id: lease.property_id,
            period_start: period.start,
            period_end: period.end,
            due_date: period.due_date(lease.due_day),
            total_amount: lease.rent_amount,
            balance_amount: lease.rent_amount,
            status: InvoiceStatus::Open,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_invoice(&invoice).await {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::Duplicate) => {
                warn!(lease_id = %lease.id, "Invoice for period created concurrently, skipping");
                return LeaseResult::AlreadyInvoiced;
            }
            Err(e) => {
                ITEM_FAILURES_TOTAL.with_label_values(&["invoice_insert"]).inc();
                error!(error = %e, lease_id = %lease.id, "Failed to create invoice");
                return LeaseResult::Failed;
            }
        }

        let line = InvoiceLine {
            id: self.ids.new_id(),
            org_id,
            invoice_id: invoice.id,
            charge_type: RENT_CHARGE_TYPE.to_string(),
            description: period.rent_description(),
            amount: lease.rent_amount,
            balance_amount: lease.rent_amount,
        };

        if let Err(e) = self.store.insert_invoice_line(&line).await {
            ITEM_FAILURES_TOTAL.with_label_values(&["line_insert"]).inc();
            error!(error = %e, invoice_id = %invoice.id, "Failed to create invoice line, rolling back invoice");
            // Deleting an already-missing invoice is a no-op, so this is safe to repeat.
            if let Err(e) = self.store.delete_invoice(org_id, invoice.id).await {
                ITEM_FAILURES_TOTAL.with_label_values(&["invoice_rollback"]).inc();
                error!(error = %e, invoice_id = %invoice.id, "Failed to roll back invoice without lines");
            }
            return LeaseResult::Failed;
        }

        INVOICES_GENERATED_TOTAL.inc();

        self.record_audit(
            org_id,
            None,
            AuditAction::CreateInvoice,
            "invoice",
            invoice.id,
            json!({
                "lease_id": lease.id,
                "period": period.start,
                "generated_by": "system",
            }),
        )
        .await;

        LeaseResult::Created(invoice.id)
    }
}
