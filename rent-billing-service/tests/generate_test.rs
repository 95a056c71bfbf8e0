mod common;

use axum::http::StatusCode;
use common::{date, dec, TestApp};
use rent_billing_service::models::{AuditAction, InvoiceStatus, LeaseStatus, RENT_CHARGE_TYPE};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_generation_is_idempotent_per_lease_and_period() {
    let app = TestApp::new();
    app.seed_lease(1200, 1);
    app.seed_lease(950, 15);
    let mut ended = app.seed_lease(800, 1);
    ended.status = LeaseStatus::Ended;
    app.store.put_lease(ended);

    let (status, body) = app.generate("2026-03-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["invoices_created"], 2);
    assert_eq!(body["skipped"], 0);
    assert_eq!(body["invoice_ids"].as_array().unwrap().len(), 2);

    let (status, body) = app.generate("2026-03-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices_created"], 0);
    assert_eq!(body["skipped"], 2);
    assert_eq!(body["failed"], 0);
    assert!(body["invoice_ids"].as_array().unwrap().is_empty());

    assert_eq!(app.store.invoices_for_org(app.org_id).len(), 2);
}

#[tokio::test]
async fn test_february_invoice_clamps_due_day() {
    let app = TestApp::new();
    let lease = app.seed_lease(500, 31);

    let (status, body) = app.generate("2026-02-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices_created"], 1);

    let invoices = app.store.invoices_for_org(app.org_id);
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(body["invoice_ids"][0], invoice.id.to_string());
    assert_eq!(invoice.lease_id, lease.id);
    assert_eq!(invoice.tenant_id, lease.tenant_id);
    assert_eq!(invoice.unit_id, lease.unit_id);
    assert_eq!(invoice.property_id, lease.property_id);
    assert_eq!(invoice.period_start, date(2026, 2, 1));
    assert_eq!(invoice.period_end, date(2026, 2, 28));
    assert_eq!(invoice.due_date, date(2026, 2, 28));
    assert_eq!(invoice.total_amount, dec(500));
    assert_eq!(invoice.balance_amount, dec(500));
    assert_eq!(invoice.status, InvoiceStatus::Open);

    let lines = app.store.lines_for_invoice(invoice.id);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].charge_type, RENT_CHARGE_TYPE);
    assert_eq!(lines[0].description, "February 2026 Rent");
    assert_eq!(lines[0].amount, dec(500));
    assert_eq!(lines[0].balance_amount, dec(500));

    let audit = app.store.audit_records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::CreateInvoice);
    assert_eq!(audit[0].entity_type, "invoice");
    assert_eq!(audit[0].entity_id, invoice.id);
    assert_eq!(audit[0].actor_user_id, None);
    assert_eq!(audit[0].metadata["lease_id"], lease.id.to_string());
    assert_eq!(audit[0].metadata["period"], "2026-02-01");
    assert_eq!(audit[0].metadata["generated_by"], "system");
}

#[tokio::test]
async fn test_mid_month_period_start_is_normalised() {
    let app = TestApp::new();
    app.seed_lease(700, 5);

    let (status, _) = app.generate("2026-03-15").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.generate("2026-03-01").await;
    assert_eq!(body["invoices_created"], 0);
    assert_eq!(body["skipped"], 1);

    let invoice = &app.store.invoices_for_org(app.org_id)[0];
    assert_eq!(invoice.period_start, date(2026, 3, 1));
    assert_eq!(invoice.due_date, date(2026, 3, 5));
}

#[tokio::test]
async fn test_line_failure_rolls_back_invoice_and_continues() {
    let app = TestApp::new();
    app.seed_lease(1000, 1);
    app.seed_lease(1100, 1);
    app.store.fail_next_line_inserts(1);

    let (status, body) = app.generate("2026-04-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices_created"], 1);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["failed"], 1);

    // Every surviving invoice has its line.
    let invoices = app.store.invoices_for_org(app.org_id);
    assert_eq!(invoices.len(), 1);
    assert_eq!(app.store.lines_for_invoice(invoices[0].id).len(), 1);

    // A retry picks up the lease that failed.
    let (_, body) = app.generate("2026-04-01").await;
    assert_eq!(body["invoices_created"], 1);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(app.store.invoices_for_org(app.org_id).len(), 2);
}

#[tokio::test]
async fn test_voided_invoice_still_counts_for_its_period() {
    let app = TestApp::new();
    let lease = app.seed_lease(650, 1);

    let (_, body) = app.generate("2026-05-01").await;
    let first: Uuid = body["invoice_ids"][0].as_str().unwrap().parse().unwrap();

    let (status, _) = app.void(first, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.generate("2026-05-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices_created"], 0);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["failed"], 0);

    let for_lease: Vec<_> = app
        .store
        .invoices_for_org(app.org_id)
        .into_iter()
        .filter(|i| i.lease_id == lease.id && i.period_start == date(2026, 5, 1))
        .collect();
    assert_eq!(for_lease.len(), 1);
    assert_eq!(for_lease[0].id, first);
}

#[tokio::test]
async fn test_other_org_leases_are_ignored() {
    let app = TestApp::new();
    let mut foreign = app.seed_lease(900, 1);
    foreign.org_id = Uuid::new_v4();
    app.store.put_lease(foreign.clone());

    let (_, body) = app.generate("2026-06-01").await;
    assert_eq!(body["invoices_created"], 0);
    assert_eq!(body["skipped"], 0);
    assert!(app.store.invoices_for_org(foreign.org_id).is_empty());
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_generation() {
    let app = TestApp::new();
    app.seed_lease(400, 1);
    app.store.fail_audit_appends();

    let (status, body) = app.generate("2026-07-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices_created"], 1);
    assert!(app.store.audit_records().is_empty());
}

#[tokio::test]
async fn test_lease_fetch_failure_returns_generic_500() {
    let app = TestApp::new();
    app.seed_lease(400, 1);
    app.store.fail_lease_fetch();

    let (status, body) = app.generate("2026-07-01").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error");
    assert!(!body.to_string().contains("unavailable"));
}

#[tokio::test]
async fn test_missing_or_malformed_fields_return_400() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/generate-monthly-invoices",
            json!({ "org_id": app.org_id.to_string() }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "org_id and period_start are required");

    let (status, body) = app
        .post(
            "/generate-monthly-invoices",
            json!({ "org_id": "", "period_start": "2026-01-01" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "org_id and period_start are required");

    let (status, body) = app
        .post(
            "/generate-monthly-invoices",
            json!({ "org_id": app.org_id.to_string(), "period_start": "January" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "period_start must be an ISO date");

    assert!(app.store.invoices_for_org(app.org_id).is_empty());
}
