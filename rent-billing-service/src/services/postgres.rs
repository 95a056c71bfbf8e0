//! PostgreSQL store for rent-billing-service.

use crate::models::{
    AuditRecord, Invoice, InvoiceLine, Lease, LeaseStatus, OpenLine, Payment, PaymentAllocation, PaymentStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::ports::{
    AuditSink, BillingStore, InsertOutcome, InvoiceBalance, RoleDirectory,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(FromRow)]
struct LeaseRow {
    id: Uuid,
    org_id: Uuid,
    tenant_id: Uuid,
    unit_id: Uuid,
    property_id: Uuid,
    rent_amount: Decimal,
    due_day: i32,
    status: String,
}

impl TryFrom<LeaseRow> for Lease {
    type Error = anyhow::Error;

    fn try_from(row: LeaseRow) -> Result<Self, Self::Error> {
        Ok(Lease {
            id: row.id,
            org_id: row.org_id,
            tenant_id: row.tenant_id,
            unit_id: row.unit_id,
            property_id: row.property_id,
            rent_amount: row.rent_amount,
            due_day: row.due_day,
            status: row.status.parse()?,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    org_id: Uuid,
    lease_id: Uuid,
    tenant_id: Uuid,
    unit_id: Uuid,
    property_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    due_date: NaiveDate,
    total_amount: Decimal,
    balance_amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = anyhow::Error;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            org_id: row.org_id,
            lease_id: row.lease_id,
            tenant_id: row.tenant_id,
            unit_id: row.unit_id,
            property_id: row.property_id,
            period_start: row.period_start,
            period_end: row.period_end,
            due_date: row.due_date,
            total_amount: row.total_amount,
            balance_amount: row.balance_amount,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    org_id: Uuid,
    tenant_id: Option<Uuid>,
    amount: Decimal,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = anyhow::Error;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            org_id: row.org_id,
            tenant_id: row.tenant_id,
            amount: row.amount,
            status: row.status.parse()?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OpenLineRow {
    line_id: Uuid,
    invoice_id: Uuid,
    balance_amount: Decimal,
    due_date: NaiveDate,
}

const INVOICE_COLUMNS: &str = "id, org_id, lease_id, tenant_id, unit_id, property_id, \
    period_start, period_end, due_date, total_amount, balance_amount, status, created_at, updated_at";

/// Connection pool wrapper implementing the billing store, role lookup and audit sink.
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "rent-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    #[instrument(skip(self), fields(org_id = %org_id))]
    async fn list_active_leases(&self, org_id: Uuid) -> anyhow::Result<Vec<Lease>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_leases"])
            .start_timer();

        let rows = sqlx::query_as::<_, LeaseRow>(
            r#"
            SELECT id, org_id, tenant_id, unit_id, property_id, rent_amount, due_day, status
            FROM leases
            WHERE org_id = $1 AND status = $2
            ORDER BY id
            "#,
        )
        .bind(org_id)
        .bind(LeaseStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch leases")?;

        timer.observe_duration();

        rows.into_iter().map(Lease::try_from).collect()
    }

    #[instrument(skip(self), fields(org_id = %org_id, lease_id = %lease_id))]
    async fn find_invoice_for_period(
        &self,
        org_id: Uuid,
        lease_id: Uuid,
        period_start: NaiveDate,
    ) -> anyhow::Result<Option<Uuid>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_for_period"])
            .start_timer();

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM invoices
            WHERE org_id = $1 AND lease_id = $2 AND period_start = $3
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(lease_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up invoice for period")?;

        timer.observe_duration();

        Ok(id)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id, lease_id = %invoice.lease_id))]
    async fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<InsertOutcome> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO invoices (
                id, org_id, lease_id, tenant_id, unit_id, property_id, period_start, period_end,
                due_date, total_amount, balance_amount, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.org_id)
        .bind(invoice.lease_id)
        .bind(invoice.tenant_id)
        .bind(invoice.unit_id)
        .bind(invoice.property_id)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.due_date)
        .bind(invoice.total_amount)
        .bind(invoice.balance_amount)
        .bind(invoice.status.as_str())
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(anyhow!("Failed to create invoice: {}", e)),
        }
    }

    #[instrument(skip(self, line), fields(invoice_id = %line.invoice_id))]
    async fn insert_invoice_line(&self, line: &InvoiceLine) -> anyhow::Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice_line"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_lines (
                id, org_id, invoice_id, charge_type, description, amount, balance_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.id)
        .bind(line.org_id)
        .bind(line.invoice_id)
        .bind(&line.charge_type)
        .bind(&line.description)
        .bind(line.amount)
        .bind(line.balance_amount)
        .execute(&self.pool)
        .await
        .context("Failed to create invoice line")?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id, invoice_id = %invoice_id))]
    async fn delete_invoice(&self, org_id: Uuid, invoice_id: Uuid) -> anyhow::Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        // Lines go with the invoice (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM invoices WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete invoice")?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(org_id = %org_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
    ) -> anyhow::Result<Option<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE org_id = $1 AND id = $2",
            INVOICE_COLUMNS
        ))
        .bind(org_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get invoice")?;

        timer.observe_duration();

        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self), fields(org_id = %org_id, payment_id = %payment_id))]
    async fn get_payment(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
    ) -> anyhow::Result<Option<Payment>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, org_id, tenant_id, amount, status, updated_at
            FROM payments
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get payment")?;

        timer.observe_duration();

        row.map(Payment::try_from).transpose()
    }

    #[instrument(skip(self), fields(org_id = %org_id, payment_id = %payment_id))]
    async fn sum_payment_allocations(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
    ) -> anyhow::Result<Decimal> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_payment_allocations"])
            .start_timer();

        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount_allocated), 0)
            FROM payment_allocations
            WHERE org_id = $1 AND payment_id = $2
            "#,
        )
        .bind(org_id)
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum payment allocations")?;

        timer.observe_duration();

        Ok(total)
    }

    #[instrument(skip(self), fields(org_id = %org_id, invoice_id = %invoice_id))]
    async fn sum_invoice_allocations(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
    ) -> anyhow::Result<Decimal> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_invoice_allocations"])
            .start_timer();

        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount_allocated), 0)
            FROM payment_allocations
            WHERE org_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(org_id)
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum invoice allocations")?;

        timer.observe_duration();

        Ok(total)
    }

    #[instrument(skip(self), fields(org_id = %org_id, tenant_id = %tenant_id))]
    async fn open_lines_for_tenant(
        &self,
        org_id: Uuid,
        tenant_id: Uuid,
    ) -> anyhow::Result<Vec<OpenLine>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["open_lines_for_tenant"])
            .start_timer();

        let rows = sqlx::query_as::<_, OpenLineRow>(
            r#"
            SELECT l.id AS line_id, l.invoice_id, l.balance_amount, i.due_date
            FROM invoice_lines l
            JOIN invoices i ON i.id = l.invoice_id
            WHERE l.org_id = $1
              AND i.org_id = $1
              AND i.tenant_id = $2
              AND i.status = 'open'
              AND l.balance_amount > 0
            ORDER BY i.due_date, i.id, l.id
            "#,
        )
        .bind(org_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch invoice lines")?;

        timer.observe_duration();

        Ok(rows
            .into_iter()
            .map(|r| OpenLine {
                line_id: r.line_id,
                invoice_id: r.invoice_id,
                balance_amount: r.balance_amount,
                due_date: r.due_date,
            })
            .collect())
    }

    #[instrument(skip(self, allocation), fields(payment_id = %allocation.payment_id, line_id = %allocation.invoice_line_id))]
    async fn insert_allocation(&self, allocation: &PaymentAllocation) -> anyhow::Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_allocation"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO payment_allocations (
                id, org_id, payment_id, invoice_line_id, invoice_id, amount_allocated
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(allocation.id)
        .bind(allocation.org_id)
        .bind(allocation.payment_id)
        .bind(allocation.invoice_line_id)
        .bind(allocation.invoice_id)
        .bind(allocation.amount_allocated)
        .execute(&self.pool)
        .await
        .context("Failed to create allocation")?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id, line_id = %line_id))]
    async fn decrement_line_balance(
        &self,
        org_id: Uuid,
        line_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Decimal> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["decrement_line_balance"])
            .start_timer();

        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE invoice_lines
            SET balance_amount = GREATEST(balance_amount - $3, 0)
            WHERE org_id = $1 AND id = $2
            RETURNING balance_amount
            "#,
        )
        .bind(org_id)
        .bind(line_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update invoice line balance")?;

        timer.observe_duration();

        balance.ok_or_else(|| anyhow!("invoice line {} not found", line_id))
    }

    #[instrument(skip(self, now), fields(org_id = %org_id, invoice_id = %invoice_id))]
    async fn apply_invoice_payment(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<InvoiceBalance>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_invoice_payment"])
            .start_timer();

        // SET expressions all read the pre-update row, so status follows the unfloored result.
        let row = sqlx::query_as::<_, (Decimal, String)>(
            r#"
            UPDATE invoices
            SET balance_amount = GREATEST(balance_amount - $3, 0),
                status = CASE WHEN balance_amount - $3 <= 0 THEN 'paid' ELSE 'open' END,
                updated_at = $4
            WHERE org_id = $1 AND id = $2 AND status <> 'void'
            RETURNING balance_amount, status
            "#,
        )
        .bind(org_id)
        .bind(invoice_id)
        .bind(amount)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update invoice balance")?;

        timer.observe_duration();

        row.map(|(balance_amount, status)| -> anyhow::Result<InvoiceBalance> {
            Ok(InvoiceBalance {
                balance_amount,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, now), fields(org_id = %org_id, payment_id = %payment_id, status = status.as_str()))]
    async fn update_payment_status(
        &self,
        org_id: Uuid,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment_status"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE payments
            SET status = $3, updated_at = $4
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id)
        .bind(payment_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to update payment status")?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, now), fields(org_id = %org_id, invoice_id = %invoice_id))]
    async fn void_invoice(
        &self,
        org_id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["void_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'void', updated_at = $3
            WHERE org_id = $1 AND id = $2 AND status <> 'void'
            "#,
        )
        .bind(org_id)
        .bind(invoice_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to void invoice")?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Health check failed")?;
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for PgBillingStore {
    #[instrument(skip(self), fields(org_id = %org_id, user_id = %user_id))]
    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<String>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["member_role"])
            .start_timer();

        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM org_members WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up org membership")?;

        timer.observe_duration();

        Ok(role)
    }
}

#[async_trait]
impl AuditSink for PgBillingStore {
    #[instrument(skip(self, record), fields(org_id = %record.org_id, action = record.action.as_str()))]
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_audit"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, org_id, actor_user_id, action, entity_type, entity_id, metadata_json, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.org_id)
        .bind(record.actor_user_id)
        .bind(record.action.as_str())
        .bind(&record.entity_type)
        .bind(record.entity_id)
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to write audit log")?;

        timer.observe_duration();

        Ok(())
    }
}
