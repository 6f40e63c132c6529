//! Shared fixtures for the Lead-Keeper API integration tests
//!
//! Builds the full router over an in-memory store and drives it with
//! `tower::ServiceExt::oneshot`. Receipt processing is stepped by hand through
//! `worker::process_next` so tests stay deterministic.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use lead_keeper_api::config::{AccessToken, ServiceConfig};
use lead_keeper_api::metrics::ServiceMetrics;
use lead_keeper_api::services::Services;
use lead_keeper_api::worker::{process_next, WorkerStep};
use lead_keeper_api::{create_router, AppState};
use lead_keeper_core::{
    MemoryCrmStore, MemoryReceiptQueue, NotificationRoute, NotificationRouting, Role,
};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "admin-token";
pub const MANAGER_TOKEN: &str = "manager-token";
pub const REP_TOKEN: &str = "rep-token";
pub const VIEWER_TOKEN: &str = "viewer-token";

pub const SIGNING_SECRET: &str = "integration-secret";

pub const LEAD_PATH: &str = "/webhooks/leads/website_form";

/// A router plus handles on the services behind it
pub struct TestApp {
    pub router: Router,
    pub services: Arc<Services>,
    pub metrics: Arc<ServiceMetrics>,
    pub config: ServiceConfig,
}

/// Configuration with one token per role and a `deal.won` notification route
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.access.tokens = vec![
        token(ADMIN_TOKEN, 1, "admin", Role::Admin),
        token(MANAGER_TOKEN, 2, "manager", Role::SalesManager),
        token(REP_TOKEN, 3, "rep", Role::SalesRep),
        token(VIEWER_TOKEN, 4, "viewer", Role::Viewer),
    ];
    config.notifications = NotificationRouting::new(vec![NotificationRoute {
        event: "deal.won".to_string(),
        channel: "email".to_string(),
        roles: vec![Role::SalesManager],
        users: vec![],
    }]);
    config.pipeline.retry = lead_keeper_core::RetryPolicy::new(2, &[Duration::ZERO]);
    config
}

fn token(value: &str, user_id: u64, name: &str, role: Role) -> AccessToken {
    AccessToken {
        token: value.to_string(),
        user_id,
        name: name.to_string(),
        role,
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let services = Arc::new(Services::with_store(
            Arc::new(MemoryCrmStore::new()),
            Arc::new(MemoryReceiptQueue::new()),
            &config,
        ));
        let metrics = ServiceMetrics::new().expect("metrics registry");
        let state = AppState::new(config.clone(), services.clone(), metrics.clone())
            .expect("valid app state");

        Self {
            router: create_router(state),
            services,
            metrics,
            config,
        }
    }

    /// Send a request and return the status and the JSON body (Null when empty)
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Deliver a lead webhook with the given idempotency key
    pub async fn deliver_lead(&self, key: &str, payload: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(LEAD_PATH)
            .header("content-type", "application/json")
            .header("idempotency-key", key)
            .body(Body::from(payload.to_string()))
            .unwrap();
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    /// Run queued receipts through the pipeline until the queue is idle
    pub async fn drain_queue(&self) -> Vec<WorkerStep> {
        let mut steps = Vec::new();
        loop {
            match process_next(&self.services, &self.metrics).await.unwrap() {
                WorkerStep::Idle => return steps,
                step => steps.push(step),
            }
        }
    }

    /// Create a contact through the API and return its id
    pub async fn create_contact(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/contacts",
                ADMIN_TOKEN,
                serde_json::json!({"email": email, "name": "Test Contact"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "contact creation failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Create a deal through the API and return its id
    pub async fn create_deal(&self, contact_id: &str, amount: u64) -> String {
        let (status, body) = self
            .post(
                "/api/deals",
                REP_TOKEN,
                serde_json::json!({
                    "title": "Annual licence",
                    "amount": amount,
                    "currency": "EUR",
                    "contact_id": contact_id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "deal creation failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }
}

/// `sha256=<hex>` signature of the body under the test secret
pub fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SIGNING_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
