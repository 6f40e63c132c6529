use super::*;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), Some("tok-ops".to_string())).unwrap()
}

#[test]
fn test_invalid_base_url_is_rejected() {
    let result = ApiClient::new("not a url", None);

    assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
}

#[tokio::test]
async fn test_list_receipts_sends_filters_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/receipts"))
        .and(query_param("status", "failed"))
        .and(query_param("limit", "10"))
        .and(header("authorization", "Bearer tok-ops"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"receipts": [], "total": 0})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let value = client_for(&server)
        .await
        .list_receipts(Some("failed"), Some(10))
        .await
        .unwrap();

    assert_eq!(value["total"], 0);
}

#[tokio::test]
async fn test_replay_posts_to_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/receipts/01HZX3/replay"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "receipt_id": "01HZX3",
            "status": "pending",
            "message": "Receipt queued for processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let value = client_for(&server)
        .await
        .replay_receipt("01HZX3")
        .await
        .unwrap();

    assert_eq!(value["status"], "pending");
}

#[tokio::test]
async fn test_mark_lost_sends_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/deals/D1/lost"))
        .and(body_json(json!({"lost_reason": "Budget cut"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "lost"})))
        .expect(1)
        .mount(&server)
        .await;

    let value = client_for(&server)
        .await
        .mark_lost("D1", "Budget cut")
        .await
        .unwrap();

    assert_eq!(value["status"], "lost");
}

#[tokio::test]
async fn test_timeline_passes_only_set_options() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/contacts/C1/timeline"))
        .and(query_param("types", "task"))
        .and(query_param("limit", "5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"entries": [], "next_cursor": null})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let options = TimelineOptions {
        types: Some("task".to_string()),
        limit: Some(5),
        ..TimelineOptions::default()
    };
    let value = client_for(&server)
        .await
        .timeline("C1", &options)
        .await
        .unwrap();

    assert!(value["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_body_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/deals/D1/won"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "Deal is already won",
            "status": 409
        })))
        .mount(&server)
        .await;

    let error = client_for(&server)
        .await
        .mark_won("D1", None)
        .await
        .unwrap_err();

    match error {
        CliError::Api { status, message } => {
            assert_eq!(status, 409);
            assert_eq!(message, "Deal is already won");
        }
        other => panic!("Expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_plain_text_error_body_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
        .mount(&server)
        .await;

    let error = client_for(&server).await.health().await.unwrap_err();

    assert!(matches!(
        error,
        CliError::Api { status: 503, ref message } if message == "down for maintenance"
    ));
}

#[test]
fn test_error_message_falls_back_to_status() {
    assert_eq!(
        error_message(StatusCode::UNAUTHORIZED, ""),
        "401 Unauthorized"
    );
}
