#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, Utc};
use rent_billing_service::{
    build_router,
    models::{
        Invoice, InvoiceLine, InvoiceStatus, Lease, LeaseStatus, Payment, PaymentStatus,
        RENT_CHARGE_TYPE,
    },
    services::{init_metrics, ledger::BillingPeriod, BillingService, InMemoryStore},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::{Arc, Once};
use tower::util::ServiceExt;
use uuid::Uuid;

static METRICS: Once = Once::new();

pub fn dec(amount: i64) -> Decimal {
    Decimal::from(amount)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Router over a fresh in-memory store, scoped to one org.
pub struct TestApp {
    pub store: InMemoryStore,
    pub router: Router,
    pub org_id: Uuid,
}

impl TestApp {
    pub fn new() -> Self {
        METRICS.call_once(init_metrics);

        let store = InMemoryStore::new();
        let shared = Arc::new(store.clone());
        let billing = BillingService::new(shared.clone(), shared.clone(), shared);
        let router = build_router(AppState { billing });

        Self {
            store,
            router,
            org_id: Uuid::new_v4(),
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn generate(&self, period_start: &str) -> (StatusCode, Value) {
        self.post(
            "/generate-monthly-invoices",
            serde_json::json!({
                "org_id": self.org_id.to_string(),
                "period_start": period_start,
            }),
        )
        .await
    }

    pub async fn allocate(&self, payment_id: Uuid) -> (StatusCode, Value) {
        self.post(
            "/allocate-payment",
            serde_json::json!({
                "payment_id": payment_id.to_string(),
                "org_id": self.org_id.to_string(),
            }),
        )
        .await
    }

    pub async fn void(&self, invoice_id: Uuid, actor: Option<Uuid>) -> (StatusCode, Value) {
        let mut body = serde_json::json!({
            "invoice_id": invoice_id.to_string(),
            "org_id": self.org_id.to_string(),
            "reason": "Issued in error",
        });
        if let Some(actor) = actor {
            body["actor_user_id"] = Value::String(actor.to_string());
        }
        self.post("/void-invoice", body).await
    }

    pub fn seed_lease(&self, rent: i64, due_day: i32) -> Lease {
        let lease = Lease {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            tenant_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            rent_amount: dec(rent),
            due_day,
            status: LeaseStatus::Active,
        };
        self.store.put_lease(lease.clone());
        lease
    }

    /// Open invoice with a single rent line carrying the whole amount.
    pub fn seed_open_invoice(
        &self,
        tenant_id: Uuid,
        due_date: NaiveDate,
        amount: i64,
    ) -> (Invoice, InvoiceLine) {
        let now = Utc::now();
        let period = BillingPeriod::containing(due_date);
        let invoice = Invoice {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            lease_id: Uuid::new_v4(),
            tenant_id,
            unit_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            period_start: period.start,
            period_end: period.end,
            due_date,
            total_amount: dec(amount),
            balance_amount: dec(amount),
            status: InvoiceStatus::Open,
            created_at: now,
            updated_at: now,
        };
        let line = InvoiceLine {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            invoice_id: invoice.id,
            charge_type: RENT_CHARGE_TYPE.to_string(),
            description: "Rent".to_string(),
            amount: dec(amount),
            balance_amount: dec(amount),
        };
        self.store.put_invoice(invoice.clone());
        self.store.put_line(line.clone());
        (invoice, line)
    }

    /// Open invoice with caller-chosen ids and one rent line per `(line_id, amount)`.
    pub fn seed_invoice_with_lines(
        &self,
        invoice_id: Uuid,
        tenant_id: Uuid,
        due_date: NaiveDate,
        lines: &[(Uuid, i64)],
    ) -> Invoice {
        let now = Utc::now();
        let period = BillingPeriod::containing(due_date);
        let total: i64 = lines.iter().map(|(_, amount)| amount).sum();
        let invoice = Invoice {
            id: invoice_id,
            org_id: self.org_id,
            lease_id: Uuid::new_v4(),
            tenant_id,
            unit_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            period_start: period.start,
            period_end: period.end,
            due_date,
            total_amount: dec(total),
            balance_amount: dec(total),
            status: InvoiceStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.store.put_invoice(invoice.clone());
        for (line_id, amount) in lines {
            self.store.put_line(InvoiceLine {
                id: *line_id,
                org_id: self.org_id,
                invoice_id,
                charge_type: RENT_CHARGE_TYPE.to_string(),
                description: "Rent".to_string(),
                amount: dec(*amount),
                balance_amount: dec(*amount),
            });
        }
        invoice
    }

    pub fn seed_payment(&self, tenant_id: Option<Uuid>, amount: i64) -> Payment {
        let payment = Payment {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            tenant_id,
            amount: dec(amount),
            status: PaymentStatus::Unallocated,
            updated_at: Utc::now(),
        };
        self.store.put_payment(payment.clone());
        payment
    }
}
