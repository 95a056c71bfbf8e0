//! FIFO payment allocation against a tenant's open invoice lines.

use crate::error::{BillingError, BillingResult};
use crate::models::{AllocationLine, AuditAction, OpenLine, Payment, PaymentAllocation};
use crate::services::billing::{ledger_key, AllocationOutcome, BillingService};
use crate::services::ledger::{floor_at_zero, payment_status_for};
use crate::services::metrics::{ALLOCATED_AMOUNT_TOTAL, ALLOCATIONS_TOTAL, ITEM_FAILURES_TOTAL};
use anyhow::Context;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const ALREADY_ALLOCATED_MESSAGE: &str = "Payment already fully allocated";

impl BillingService {
    /// Applies the payment's unallocated remainder to the tenant's open lines, oldest due
    /// date first. Per-line write failures are logged and skipped.
    #[instrument(skip(self), fields(org_id = %org_id, payment_id = %payment_id))]
    pub async fn allocate_payment(
        &self,
        payment_id: Uuid,
        org_id: Uuid,
        actor_user_id: Option<Uuid>,
    ) -> BillingResult<AllocationOutcome> {
        let payment = self
            .store
            .get_payment(org_id, payment_id)
            .await
            .context("Failed to fetch payment")?
            .ok_or_else(|| BillingError::NotFound("Payment not found".to_string()))?;

        let lock_key = match payment.tenant_id {
            Some(tenant_id) => ledger_key(org_id, tenant_id),
            None => format!("payment:{}", payment_id),
        };
        let _guard = self.locks.acquire(lock_key).await;

        let existing = self
            .store
            .sum_payment_allocations(org_id, payment_id)
            .await
            .context("Failed to fetch existing allocations")?;

        let mut remaining = payment.amount - existing;
        if remaining <= Decimal::ZERO {
            info!("Payment already fully allocated");
            return Ok(AllocationOutcome {
                allocations: Vec::new(),
                total_allocated: Decimal::ZERO,
                remaining_unallocated: Decimal::ZERO,
                payment_status: payment_status_for(existing, payment.amount),
                message: Some(ALREADY_ALLOCATED_MESSAGE.to_string()),
            });
        }

        let lines = match payment.tenant_id {
            Some(tenant_id) => self
                .store
                .open_lines_for_tenant(org_id, tenant_id)
                .await
                .context("Failed to fetch invoice lines")?,
            None => {
                warn!("Payment has no tenant, nothing to allocate against");
                Vec::new()
            }
        };

        let mut allocations = Vec::new();
        for line in &lines {
            if remaining <= Decimal::ZERO {
                break;
            }
            let amount = remaining.min(line.balance_amount);
            if amount <= Decimal::ZERO {
                continue;
            }
            if let Some(allocation) = self.allocate_line(&payment, line, amount).await {
                remaining -= amount;
                allocations.push(allocation);
            }
        }

        let total_allocated: Decimal = allocations.iter().map(|a| a.amount).sum();
        let payment_status = payment_status_for(existing + total_allocated, payment.amount);

        if let Err(e) = self
            .store
            .update_payment_status(org_id, payment_id, payment_status, self.clock.now())
            .await
        {
            ITEM_FAILURES_TOTAL.with_label_values(&["payment_status"]).inc();
            error!(error = %e, status = payment_status.as_str(), "Failed to update payment status");
        }

        self.record_audit(
            org_id,
            actor_user_id,
            AuditAction::AllocatePayment,
            "payment",
            payment_id,
            json!({
                "allocations": allocations,
                "remaining_unallocated": remaining,
            }),
        )
        .await;

        info!(
            allocations_made = allocations.len(),
            total_allocated = %total_allocated,
            remaining_unallocated = %remaining,
            payment_status = payment_status.as_str(),
            "Payment allocation completed"
        );

        Ok(AllocationOutcome {
            allocations,
            total_allocated,
            remaining_unallocated: floor_at_zero(remaining),
            payment_status,
            message: None,
        })
    }

    /// Writes one allocation and applies it to the line and invoice balances.
    /// Returns `None` when the allocation record could not be written.
    async fn allocate_line(
        &self,
        payment: &Payment,
        line: &OpenLine,
        amount: Decimal,
    ) -> Option<AllocationLine> {
        let allocation = PaymentAllocation {
            id: self.ids.new_id(),
            org_id: payment.org_id,
            payment_id: payment.id,
            invoice_id: line.invoice_id,
            invoice_line_id: line.line_id,
            amount_allocated: amount,
        };

        if let Err(e) = self.store.insert_allocation(&allocation).await {
            ITEM_FAILURES_TOTAL.with_label_values(&["allocation_insert"]).inc();
            error!(error = %e, line_id = %line.line_id, "Failed to create allocation");
            return None;
        }

        // The allocation is committed from here on; balance write failures are logged only.
        if let Err(e) = self
            .store
            .decrement_line_balance(payment.org_id, line.line_id, amount)
            .await
        {
            ITEM_FAILURES_TOTAL.with_label_values(&["line_balance"]).inc();
            error!(error = %e, line_id = %line.line_id, "Failed to update invoice line balance");
        }

        match self
            .store
            .apply_invoice_payment(payment.org_id, line.invoice_id, amount, self.clock.now())
            .await
        {
            Ok(Some(balance)) => {
                info!(
                    invoice_id = %line.invoice_id,
                    balance_amount = %balance.balance_amount,
                    status = balance.status.as_str(),
                    "Invoice balance updated"
                );
            }
            Ok(None) => {
                warn!(invoice_id = %line.invoice_id, "Invoice missing or void, balance not updated");
            }
            Err(e) => {
                ITEM_FAILURES_TOTAL.with_label_values(&["invoice_balance"]).inc();
                error!(error = %e, invoice_id = %line.invoice_id, "Failed to update invoice balance");
            }
        }

        ALLOCATIONS_TOTAL.inc();
        if let Some(amount) = amount.to_f64() {
            ALLOCATED_AMOUNT_TOTAL.inc_by(amount);
        }

        Some(AllocationLine {
            invoice_id: line.invoice_id,
            invoice_line_id: line.line_id,
            amount,
        })
    }
}
