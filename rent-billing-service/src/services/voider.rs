//! Invoice voiding.

use crate::error::{BillingError, BillingResult};
use crate::models::{AuditAction, Invoice, InvoiceStatus, OrgRole};
use crate::services::billing::{ledger_key, BillingService};
use crate::services::metrics::INVOICES_VOIDED_TOTAL;
use anyhow::Context;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const ALREADY_VOID_MESSAGE: &str = "Invoice is already voided";

impl BillingService {
    /// Moves an invoice to `void`. Balances, lines and payments are left as they are.
    ///
    /// When `actor_user_id` is given the actor must be an owner or accountant of the org;
    /// without it the caller is trusted.
    #[instrument(skip(self, reason), fields(org_id = %org_id, invoice_id = %invoice_id))]
    pub async fn void_invoice(
        &self,
        invoice_id: Uuid,
        org_id: Uuid,
        reason: &str,
        actor_user_id: Option<Uuid>,
    ) -> BillingResult<Uuid> {
        if let Some(user_id) = actor_user_id {
            self.authorize_voider(org_id, user_id).await?;
        }

        let invoice = self.fetch_invoice(org_id, invoice_id).await?;
        let _guard = self
            .locks
            .acquire(ledger_key(org_id, invoice.tenant_id))
            .await;
        // Re-read under the ledger lock so the checks below see settled state.
        let invoice = self.fetch_invoice(org_id, invoice_id).await?;

        if invoice.status == InvoiceStatus::Void {
            return Err(BillingError::Conflict(ALREADY_VOID_MESSAGE.to_string()));
        }

        let allocated_amount = self
            .store
            .sum_invoice_allocations(org_id, invoice_id)
            .await
            .context("Failed to fetch invoice allocations")?;
        if allocated_amount > Decimal::ZERO {
            warn!(allocated_amount = %allocated_amount, "Refusing to void invoice with allocations");
            return Err(BillingError::InvoiceHasAllocations { allocated_amount });
        }

        let voided = self
            .store
            .void_invoice(org_id, invoice_id, self.clock.now())
            .await
            .context("Failed to void invoice")?;
        if !voided {
            return Err(BillingError::Conflict(ALREADY_VOID_MESSAGE.to_string()));
        }

        INVOICES_VOIDED_TOTAL.inc();

        self.record_audit(
            org_id,
            actor_user_id,
            AuditAction::VoidInvoice,
            "invoice",
            invoice_id,
            json!({
                "reason": reason,
                "original_amount": invoice.total_amount,
                "tenant_id": invoice.tenant_id,
                "period_start": invoice.period_start,
            }),
        )
        .await;

        info!(reason = reason, "Invoice voided");

        Ok(invoice_id)
    }

    async fn authorize_voider(&self, org_id: Uuid, user_id: Uuid) -> BillingResult<()> {
        let role = self
            .roles
            .member_role(org_id, user_id)
            .await
            .context("Failed to look up org membership")?
            .ok_or_else(|| BillingError::Forbidden("User not found in organization".to_string()))?;

        let allowed = role
            .parse::<OrgRole>()
            .map(|role| role.can_void_invoices())
            .unwrap_or(false);
        if !allowed {
            warn!(user_id = %user_id, role = %role, "Role may not void invoices");
            return Err(BillingError::Forbidden(
                "Only owners and accountants can void invoices".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_invoice(&self, org_id: Uuid, invoice_id: Uuid) -> BillingResult<Invoice> {
        self.store
            .get_invoice(org_id, invoice_id)
            .await
            .context("Failed to fetch invoice")?
            .ok_or_else(|| BillingError::NotFound("Invoice not found".to_string()))
    }
}
