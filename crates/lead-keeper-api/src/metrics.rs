//! Prometheus metrics for the service
//!
//! Each [`ServiceMetrics`] owns its own [`Registry`], so several instances
//! (one per test router, for example) never collide.

use lead_keeper_core::pipeline::PipelineOutcome;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // Lead ingestion
    pub webhook_receipts_total: IntCounterVec,
    pub pipeline_attempts_total: IntCounterVec,
    pub pipeline_failures_recorded_total: IntCounter,
    pub receipt_queue_depth: IntGauge,

    // Deals
    pub deal_transitions_total: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request processing time")
                .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0]),
            &["method", "path"],
        )?;
        let webhook_receipts_total = IntCounterVec::new(
            Opts::new("webhook_receipts_total", "Inbound lead webhooks by outcome"),
            &["outcome"],
        )?;
        let pipeline_attempts_total = IntCounterVec::new(
            Opts::new("pipeline_attempts_total", "Lead processing attempts by outcome"),
            &["outcome"],
        )?;
        let pipeline_failures_recorded_total = IntCounter::new(
            "pipeline_failures_recorded_total",
            "Receipts that exhausted their retry budget",
        )?;
        let receipt_queue_depth = IntGauge::new(
            "receipt_queue_depth",
            "Receipts queued or in flight",
        )?;
        let deal_transitions_total = IntCounterVec::new(
            Opts::new("deal_transitions_total", "Successful deal state changes by action"),
            &["action"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(webhook_receipts_total.clone()))?;
        registry.register(Box::new(pipeline_attempts_total.clone()))?;
        registry.register(Box::new(pipeline_failures_recorded_total.clone()))?;
        registry.register(Box::new(receipt_queue_depth.clone()))?;
        registry.register(Box::new(deal_transitions_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            webhook_receipts_total,
            pipeline_attempts_total,
            pipeline_failures_recorded_total,
            receipt_queue_depth,
            deal_transitions_total,
        }))
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    /// `outcome` is `accepted`, `duplicate` or `rejected`
    pub fn record_webhook(&self, outcome: &str) {
        self.webhook_receipts_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_pipeline_outcome(&self, outcome: &PipelineOutcome) {
        self.pipeline_attempts_total
            .with_label_values(&[outcome.label()])
            .inc();
        if matches!(outcome, PipelineOutcome::Exhausted { .. }) {
            self.pipeline_failures_recorded_total.inc();
        }
    }

    pub fn record_pipeline_retry(&self) {
        self.pipeline_attempts_total
            .with_label_values(&["retry_scheduled"])
            .inc();
    }

    pub fn record_deal_transition(&self, action: &str) {
        self.deal_transitions_total.with_label_values(&[action]).inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.receipt_queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
