//! Deal lifecycle through the CRM endpoints

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN_TOKEN, MANAGER_TOKEN, REP_TOKEN, VIEWER_TOKEN};
use serde_json::json;

#[tokio::test]
async fn test_created_deal_is_open_and_owned_by_creator() {
    let app = TestApp::new();
    let contact_id = app.create_contact("buyer@example.com").await;

    let (status, deal) = app
        .post(
            "/api/deals",
            REP_TOKEN,
            json!({
                "title": "Pilot",
                "amount": 1000,
                "currency": "eur",
                "contact_id": contact_id,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deal["status"], "open");
    assert_eq!(deal["stage"], "new");
    assert_eq!(deal["owner_id"], 3);
    assert_eq!(deal["currency"], "EUR");
}

#[tokio::test]
async fn test_deal_for_unknown_contact_is_rejected() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/api/deals",
            REP_TOKEN,
            json!({
                "title": "Ghost",
                "amount": 10,
                "currency": "EUR",
                "contact_id": lead_keeper_core::ContactId::new().to_string(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_won_defaults_to_deal_amount_and_second_win_conflicts() {
    let app = TestApp::new();
    let contact_id = app.create_contact("won@example.com").await;
    let deal_id = app.create_deal(&contact_id, 1000).await;

    let (status, deal) = app
        .send(
            Method::POST,
            &format!("/api/deals/{}/won", deal_id),
            Some(REP_TOKEN),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["status"], "won");
    assert_eq!(deal["won_amount"], 1000);
    assert!(deal["closed_at"].is_string());

    let (status, body) = app
        .post(
            &format!("/api/deals/{}/won", deal_id),
            REP_TOKEN,
            json!({"won_amount": 900}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
}

#[tokio::test]
async fn test_won_with_explicit_amount() {
    let app = TestApp::new();
    let contact_id = app.create_contact("won2@example.com").await;
    let deal_id = app.create_deal(&contact_id, 1000).await;

    let (status, deal) = app
        .post(
            &format!("/api/deals/{}/won", deal_id),
            REP_TOKEN,
            json!({"won_amount": 950}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["won_amount"], 950);
}

#[tokio::test]
async fn test_lost_requires_meaningful_reason() {
    let app = TestApp::new();
    let contact_id = app.create_contact("lost@example.com").await;
    let deal_id = app.create_deal(&contact_id, 500).await;
    let uri = format!("/api/deals/{}/lost", deal_id);

    let (status, _) = app.post(&uri, REP_TOKEN, json!({"lost_reason": "meh"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, deal) = app
        .post(&uri, REP_TOKEN, json!({"lost_reason": "Chose a competitor"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["status"], "lost");
    assert_eq!(deal["lost_reason"], "Chose a competitor");
}

#[tokio::test]
async fn test_missing_lost_reason_reports_field() {
    let app = TestApp::new();
    let contact_id = app.create_contact("noreason@example.com").await;
    let deal_id = app.create_deal(&contact_id, 500).await;
    let uri = format!("/api/deals/{}/lost", deal_id);

    let (status, body) = app.post(&uri, REP_TOKEN, json!({})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], 422);
    assert_eq!(body["fields"][0]["field"], "lost_reason");

    let (status, deal) = app.get(&format!("/api/deals/{}", deal_id), REP_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["status"], "open");
}

#[tokio::test]
async fn test_restore_reopens_deleted_lost_deal() {
    let app = TestApp::new();
    let contact_id = app.create_contact("restore@example.com").await;
    let deal_id = app.create_deal(&contact_id, 700).await;
    app.post(
        &format!("/api/deals/{}/lost", deal_id),
        REP_TOKEN,
        json!({"lost_reason": "Budget frozen"}),
    )
    .await;
    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/api/deals/{}", deal_id),
            Some(MANAGER_TOKEN),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .get(&format!("/api/deals/{}", deal_id), MANAGER_TOKEN)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, deal) = app
        .send(
            Method::POST,
            &format!("/api/deals/{}/restore", deal_id),
            Some(MANAGER_TOKEN),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["status"], "open");
    assert!(deal["lost_reason"].is_null());
    assert!(deal["closed_at"].is_null());
    assert!(deal["won_amount"].is_null());
}

#[tokio::test]
async fn test_stage_change_cannot_close_deal() {
    let app = TestApp::new();
    let contact_id = app.create_contact("closing@example.com").await;
    let deal_id = app.create_deal(&contact_id, 500).await;

    let (status, body) = app
        .post(
            &format!("/api/deals/{}/stage", deal_id),
            REP_TOKEN,
            json!({"stage": "closed"}),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"][0]["field"], "stage");
}

#[tokio::test]
async fn test_stage_change_and_assignment() {
    let app = TestApp::new();
    let contact_id = app.create_contact("stage@example.com").await;
    let deal_id = app.create_deal(&contact_id, 300).await;

    let (status, deal) = app
        .post(
            &format!("/api/deals/{}/stage", deal_id),
            REP_TOKEN,
            json!({"stage": "proposal", "probability": 60}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["stage"], "proposal");
    assert_eq!(deal["probability"], 60);

    let (status, deal) = app
        .post(
            &format!("/api/deals/{}/assign", deal_id),
            MANAGER_TOKEN,
            json!({"owner_id": 2}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["owner_id"], 2);
}

#[tokio::test]
async fn test_deal_won_notifies_routed_role() {
    let app = TestApp::new();
    let contact_id = app.create_contact("notify@example.com").await;
    let deal_id = app.create_deal(&contact_id, 1200).await;
    app.send(
        Method::POST,
        &format!("/api/deals/{}/won", deal_id),
        Some(REP_TOKEN),
        None,
    )
    .await;

    let (status, notifications) = app.get("/admin/notifications", ADMIN_TOKEN).await;

    assert_eq!(status, StatusCode::OK);
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["event"], "deal.won");
    assert_eq!(notifications[0]["channel"], "email");
    assert_eq!(notifications[0]["recipient"]["value"], "sales_manager");
}

mod authorization_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = TestApp::new();

        let (status, _) = app.send(Method::GET, "/api/contacts", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let app = TestApp::new();

        let (status, _) = app.get("/api/contacts", "not-a-token").await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_viewer_cannot_change_deals() {
        let app = TestApp::new();
        let contact_id = app.create_contact("viewer@example.com").await;
        let deal_id = app.create_deal(&contact_id, 100).await;

        let (status, _) = app
            .get(&format!("/api/deals/{}", deal_id), VIEWER_TOKEN)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post(
                &format!("/api/deals/{}/stage", deal_id),
                VIEWER_TOKEN,
                json!({"stage": "qualified"}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_deal_id_is_bad_request() {
        let app = TestApp::new();

        let (status, _) = app.get("/api/deals/not-an-id", ADMIN_TOKEN).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
