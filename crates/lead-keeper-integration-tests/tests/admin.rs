//! Receipt inspection, replay, the failure ledger and audit retention

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN_TOKEN, MANAGER_TOKEN, REP_TOKEN};
use lead_keeper_api::worker::WorkerStep;
use lead_keeper_core::PipelineOutcome;
use serde_json::json;

/// A receipt whose payload can never be normalized, driven to exhaustion
async fn exhausted_receipt(app: &TestApp) -> String {
    let (_, accepted) = app.deliver_lead("broken", &json!(["not", "a", "lead"])).await;
    let steps = app.drain_queue().await;
    assert!(matches!(
        steps.last(),
        Some(WorkerStep::Completed(PipelineOutcome::Exhausted { .. }))
    ));
    accepted["receipt_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_receipt_listing_filters_by_status() {
    let app = TestApp::new();
    app.deliver_lead("ok-1", &json!({"email": "one@example.com"})).await;
    app.drain_queue().await;
    app.deliver_lead("ok-2", &json!({"email": "two@example.com"})).await;

    let (status, all) = app.get("/admin/receipts", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 2);

    let (status, pending) = app.get("/admin/receipts?status=pending", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["total"], 1);

    let (status, _) = app.get("/admin/receipts?status=lost", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_receipt_detail_hides_credentials() {
    let app = TestApp::new();
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri(common::LEAD_PATH)
        .header("idempotency-key", "hdr-1")
        .header("authorization", "Bearer leaked")
        .header("x-event-type", "lead.updated")
        .body(axum::body::Body::from(r#"{"email":"h@example.com"}"#))
        .unwrap();
    let (_, accepted) = app.dispatch(request).await;
    let receipt_id = accepted["receipt_id"].as_str().unwrap();

    let (status, receipt) = app
        .get(&format!("/admin/receipts/{}", receipt_id), ADMIN_TOKEN)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["event_type"], "lead.updated");
    assert_eq!(receipt["source"], "website_form");
    assert!(!receipt.to_string().contains("leaked"));
}

#[tokio::test]
async fn test_exhausted_receipt_has_single_failure_record() {
    let app = TestApp::new();
    let receipt_id = exhausted_receipt(&app).await;

    let (status, receipt) = app
        .get(&format!("/admin/receipts/{}", receipt_id), ADMIN_TOKEN)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["status"], "failed");
    assert_eq!(receipt["attempts"], 2);

    let (status, failures) = app.get("/admin/failures", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    let failures = failures.as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["receipt_id"], receipt_id.as_str());
    assert_eq!(failures[0]["attempts"], 2);

    let failure_id = failures[0]["id"].as_str().unwrap();
    let (status, record) = app
        .get(&format!("/admin/failures/{}", failure_id), ADMIN_TOKEN)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["receipt_id"], receipt_id.as_str());
}

#[tokio::test]
async fn test_replay_requeues_with_fresh_budget() {
    let app = TestApp::new();
    let receipt_id = exhausted_receipt(&app).await;

    let (status, replay) = app
        .send(
            Method::POST,
            &format!("/admin/receipts/{}/replay", receipt_id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(replay["status"], "pending");
    assert_eq!(app.services.queue.depth().await.unwrap(), 1);
    let steps = app.drain_queue().await;
    assert!(matches!(steps.first(), Some(WorkerStep::Rescheduled { .. })));
}

#[tokio::test]
async fn test_replay_of_unknown_receipt_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/admin/receipts/{}/replay", lead_keeper_core::ReceiptId::new()),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_endpoints_require_webhook_administration() {
    let app = TestApp::new();

    let (status, _) = app.get("/admin/receipts", MANAGER_TOKEN).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/admin/failures", REP_TOKEN).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::GET, "/admin/failures", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_audit_prune_keeps_recent_entries() {
    let app = TestApp::new();
    let contact_id = app.create_contact("audit@example.com").await;

    let (status, pruned) = app
        .post("/admin/audit/prune", ADMIN_TOKEN, json!({"older_than_days": 30}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(pruned["removed"], 0);
    let (_, page) = app
        .get(
            &format!("/api/contacts/{}/timeline?types=system", contact_id),
            ADMIN_TOKEN,
        )
        .await;
    assert_eq!(page["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_audit_prune_requires_admin() {
    let app = TestApp::new();

    let (status, _) = app
        .post("/admin/audit/prune", MANAGER_TOKEN, json!({"older_than_days": 1}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_metrics_count_webhook_outcomes() {
    let app = TestApp::new();
    app.deliver_lead("m-1", &json!({"email": "m@example.com"})).await;
    app.deliver_lead("m-1", &json!({"email": "m@example.com"})).await;

    let (status, body) = app.send(Method::GET, "/metrics", None, None).await;

    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("webhook_receipts_total{outcome=\"accepted\"} 1"));
    assert!(text.contains("webhook_receipts_total{outcome=\"duplicate\"} 1"));
}
