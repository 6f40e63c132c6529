//! HTTP client for the Lead-Keeper API
//!
//! Thin wrapper over `reqwest` that attaches the bearer token, maps non-2xx
//! responses to [`CliError::Api`] and returns response bodies as JSON values.

use crate::CliError;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Filters for a timeline request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineOptions {
    /// Comma-separated entry types
    pub types: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// Client for the admin and CRM endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, CliError> {
        let base_url = Url::parse(base_url).map_err(|e| CliError::InvalidArgument {
            arg: "url".to_string(),
            message: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("lead-keeper-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub async fn health(&self) -> Result<Value, CliError> {
        self.send(self.request(Method::GET, "/health")?).await
    }

    pub async fn list_receipts(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Value, CliError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.send(self.request(Method::GET, "/admin/receipts")?.query(&query))
            .await
    }

    pub async fn get_receipt(&self, id: &str) -> Result<Value, CliError> {
        let path = format!("/admin/receipts/{}", id);
        self.send(self.request(Method::GET, &path)?).await
    }

    pub async fn replay_receipt(&self, id: &str) -> Result<Value, CliError> {
        let path = format!("/admin/receipts/{}/replay", id);
        self.send(self.request(Method::POST, &path)?).await
    }

    pub async fn list_failures(&self, limit: Option<usize>) -> Result<Value, CliError> {
        let query: Vec<(&str, String)> = limit
            .map(|l| vec![("limit", l.to_string())])
            .unwrap_or_default();
        self.send(self.request(Method::GET, "/admin/failures")?.query(&query))
            .await
    }

    pub async fn get_failure(&self, id: &str) -> Result<Value, CliError> {
        let path = format!("/admin/failures/{}", id);
        self.send(self.request(Method::GET, &path)?).await
    }

    pub async fn change_stage(
        &self,
        deal_id: &str,
        stage: &str,
        probability: Option<u8>,
    ) -> Result<Value, CliError> {
        let path = format!("/api/deals/{}/stage", deal_id);
        let body = json!({ "stage": stage, "probability": probability });
        self.send(self.request(Method::POST, &path)?.json(&body))
            .await
    }

    pub async fn mark_won(&self, deal_id: &str, amount: Option<u64>) -> Result<Value, CliError> {
        let path = format!("/api/deals/{}/won", deal_id);
        let body = json!({ "won_amount": amount });
        self.send(self.request(Method::POST, &path)?.json(&body))
            .await
    }

    pub async fn mark_lost(&self, deal_id: &str, reason: &str) -> Result<Value, CliError> {
        let path = format!("/api/deals/{}/lost", deal_id);
        let body = json!({ "lost_reason": reason });
        self.send(self.request(Method::POST, &path)?.json(&body))
            .await
    }

    pub async fn timeline(
        &self,
        contact_id: &str,
        options: &TimelineOptions,
    ) -> Result<Value, CliError> {
        let path = format!("/api/contacts/{}/timeline", contact_id);
        let mut query: Vec<(&str, String)> = Vec::new();
        for (key, value) in [
            ("types", &options.types),
            ("from", &options.from),
            ("to", &options.to),
            ("cursor", &options.cursor),
        ] {
            if let Some(value) = value {
                query.push((key, value.clone()));
            }
        }
        if let Some(limit) = options.limit {
            query.push(("limit", limit.to_string()));
        }
        self.send(self.request(Method::GET, &path)?.query(&query))
            .await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CliError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CliError::InvalidArgument {
                arg: "url".to_string(),
                message: e.to_string(),
            })?;
        debug!(method = %method, url = %url, "Sending request");

        let builder = self.http.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, CliError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CliError::Api {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| CliError::Output {
            message: format!("Invalid JSON from server: {}", e),
        })
    }
}

/// The `error` field of an API error body, or the raw text
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty())
        .or_else(|| Some(body.trim().to_string()).filter(|m| !m.is_empty()))
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
