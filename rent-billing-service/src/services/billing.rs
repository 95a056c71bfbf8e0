//! Billing service: the generator, allocator and voider share this state.

use crate::models::{AllocationLine, AuditAction, AuditRecord, PaymentStatus};
use crate::services::locks::KeyedLocks;
use crate::services::metrics::ITEM_FAILURES_TOTAL;
use crate::services::ports::{
    AuditSink, BillingStore, Clock, IdGenerator, RoleDirectory, SystemClock, UuidV4Generator,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Result of one generator run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutcome {
    /// Ids of invoices created by this run.
    pub created: Vec<Uuid>,
    /// Leases that got no new invoice: already invoiced, or a write failed.
    pub skipped: Vec<Uuid>,
    /// Subset of `skipped` whose invoice or line write failed.
    pub failed: Vec<Uuid>,
}

/// Result of one allocator run.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub allocations: Vec<AllocationLine>,
    /// Sum allocated during this run.
    pub total_allocated: Decimal,
    pub remaining_unallocated: Decimal,
    pub payment_status: PaymentStatus,
    /// Set when the payment was already fully allocated and nothing was done.
    pub message: Option<String>,
}

impl AllocationOutcome {
    pub fn allocations_made(&self) -> usize {
        self.allocations.len()
    }
}

#[derive(Clone)]
pub struct BillingService {
    pub(crate) store: Arc<dyn BillingStore>,
    pub(crate) roles: Arc<dyn RoleDirectory>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: KeyedLocks,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        roles: Arc<dyn RoleDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            roles,
            audit,
            ids: Arc::new(UuidV4Generator),
            clock: Arc::new(SystemClock),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    /// Appends an audit record. Failures are logged and swallowed.
    pub(crate) async fn record_audit(
        &self,
        org_id: Uuid,
        actor_user_id: Option<Uuid>,
        action: AuditAction,
        entity_type: &str,
        entity_id: Uuid,
        metadata: serde_json::Value,
    ) {
        let record = AuditRecord {
            id: self.ids.new_id(),
            org_id,
            actor_user_id,
            action,
            entity_type: entity_type.to_string(),
            entity_id,
            metadata,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.audit.append(&record).await {
            ITEM_FAILURES_TOTAL.with_label_values(&["audit"]).inc();
            error!(
                error = %e,
                org_id = %org_id,
                action = action.as_str(),
                entity_id = %entity_id,
                "Failed to write audit log"
            );
        }
    }
}

/// Ledger lock key shared by the allocator and voider for one tenant's invoices.
pub(crate) fn ledger_key(org_id: Uuid, tenant_id: Uuid) -> String {
    format!("ledger:{}:{}", org_id, tenant_id)
}
