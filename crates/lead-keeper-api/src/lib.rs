//! # Lead-Keeper HTTP Service
//!
//! HTTP server for inbound lead webhooks and the CRM back-office API.
//!
//! This service provides:
//! - Lead webhook endpoint with optional signature validation
//! - Deal, contact, activity and timeline endpoints behind bearer tokens
//! - Admin endpoints for receipts, failures, audit retention and notifications
//! - Health, readiness and Prometheus metrics endpoints
//! - Background workers that drive receipts through the lead pipeline

pub mod admin;
pub mod auth;
pub mod config;
pub mod crm;
pub mod errors;
pub mod metrics;
pub mod responses;
pub mod services;
pub mod webhook;
pub mod worker;

use crate::auth::TokenRegistry;
use crate::config::ServiceConfig;
use crate::errors::{ApiError, ConfigError, ServiceError};
use crate::metrics::ServiceMetrics;
use crate::responses::{HealthCheckResult, HealthResponse, ReadinessResponse};
use crate::services::Services;
use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use lead_keeper_core::{HmacSignatureValidator, SignatureValidator, Timestamp, Ulid};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,

    pub services: Arc<Services>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,

    /// Bearer token to actor lookup
    pub tokens: Arc<TokenRegistry>,

    /// Present when a signing secret is configured
    pub signature: Option<Arc<dyn SignatureValidator>>,
}

impl AppState {
    /// Create application state from validated configuration
    pub fn new(
        config: ServiceConfig,
        services: Arc<Services>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ConfigError> {
        let signature = match config.webhooks.signing_secret.as_deref() {
            Some(secret) => {
                let validator = HmacSignatureValidator::new(secret).map_err(|e| {
                    ConfigError::Invalid {
                        message: format!("webhooks.signing_secret: {}", e),
                    }
                })?;
                Some(Arc::new(validator) as Arc<dyn SignatureValidator>)
            }
            None => None,
        };
        let tokens = Arc::new(TokenRegistry::from_config(&config.access));

        Ok(Self {
            config: Arc::new(config),
            services,
            metrics,
            tokens,
            signature,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("signature", &self.signature.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check))
        .route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(webhook::routes(&state.config))
        .merge(health_routes)
        .merge(crm::routes())
        .merge(admin::routes());

    if state.config.server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Start the HTTP server and the background workers
///
/// Runs until SIGINT or SIGTERM, then stops accepting connections, signals
/// the workers and waits up to `server.shutdown_timeout_seconds` for them.
pub async fn start_server(config: ServiceConfig) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;
    let services = Arc::new(Services::from_config(&config).await?);

    let recovered = services
        .ingestion
        .recover(&services.pipeline)
        .await?;
    info!(recovered, "Startup recovery complete");

    let state = AppState::new(config.clone(), services.clone(), metrics.clone())?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ServiceError::BindFailed {
            address: format!("{}:{}", config.server.host, config.server.port),
            message: format!("{}", e),
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = worker::spawn_workers(
        services.clone(),
        metrics,
        &config.pipeline,
        shutdown_rx.clone(),
    );
    if let Some(pruner) = worker::spawn_audit_pruner(services, &config.audit, shutdown_rx) {
        background.push(pruner);
    }

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await;

    // Workers stop only after the listener has drained
    let _ = shutdown_tx.send(true);
    let drain = join_background(background);
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Background workers did not stop in time"
        );
    }

    served.map_err(|e| ServiceError::ServerFailed {
        message: e.to_string(),
    })?;
    info!("HTTP server shutdown complete");
    Ok(())
}

async fn join_background(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked");
        }
    }
}

async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", timeout.as_secs());
        },
    }
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness: the process answers requests
#[instrument(skip(_state))]
async fn handle_health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    let start = Instant::now();
    let mut checks = BTreeMap::new();
    checks.insert(
        "service".to_string(),
        HealthCheckResult {
            healthy: true,
            message: "Service is running".to_string(),
            duration_ms: elapsed_ms(start),
        },
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        checks,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: the store and the queue both answer
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let store_ready = match state.services.check_store().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Store readiness check failed");
            false
        }
    };
    let queue_ready = match state.services.queue.depth().await {
        Ok(depth) => {
            state.metrics.set_queue_depth(depth);
            true
        }
        Err(e) => {
            warn!(error = %e, "Queue readiness check failed");
            false
        }
    };

    if store_ready && queue_ready {
        Ok(Json(ReadinessResponse {
            ready: true,
            timestamp: Timestamp::now(),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, ApiError> {
    if let Ok(depth) = state.services.queue.depth().await {
        state.metrics.set_queue_depth(depth);
    }
    let body = state.metrics.render().map_err(|e| ApiError::Internal {
        message: format!("Failed to encode metrics: {}", e),
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware
///
/// Reads `x-correlation-id` or generates one, logs the request start and
/// completion, and echoes the id on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| lead_keeper_core::CorrelationId::new().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    info!(correlation_id = %correlation_id, method = %method, uri = %uri, "Request started");

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Records request counts and durations by normalized path
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path_for_metrics(request.uri().path());

    let response = next.run(request).await;

    state
        .metrics
        .record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Check if a string looks like a UUID with the 8-4-4-4-12 hyphen pattern
fn is_uuid_like(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Check if a string is a 26-character ULID
fn is_ulid_like(s: &str) -> bool {
    s.len() == 26 && s.parse::<Ulid>().is_ok()
}

/// Normalize path for metrics to avoid cardinality explosion
///
/// Converts paths like `/api/deals/01J9Z...` to `/api/deals/:id`
fn normalize_path_for_metrics(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let is_numeric = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
            if is_numeric || is_uuid_like(segment) || is_ulid_like(segment) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
