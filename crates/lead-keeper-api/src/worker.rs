//! Background processing of queued receipts
//!
//! Each worker loops: take the next visible job, run one pipeline attempt,
//! then ack the job or release it back to the queue for its retry. Workers
//! stop when the shutdown channel flips to `true`.
//!
//! A job is only acked once its receipt reached a terminal outcome. When a
//! status write fails the job is released, and the next delivery settles
//! the stranded attempt.

use crate::admin::retention_cutoff;
use crate::config::{AuditConfig, PipelineConfig};
use crate::metrics::ServiceMetrics;
use crate::services::Services;
use lead_keeper_core::storage::StorageError;
use lead_keeper_core::{AuditLog, PipelineError, PipelineOutcome, ReceiptId, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before retrying a job whose attempt hit a transient storage error
pub const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What a single worker step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStep {
    /// No job was visible
    Idle,
    /// The attempt finished and the job was acked
    Completed(PipelineOutcome),
    /// The attempt failed; the job becomes visible again at `available_at`
    Rescheduled {
        receipt_id: ReceiptId,
        available_at: Timestamp,
    },
    /// The job could not be processed at all and was discarded
    Dropped { receipt_id: ReceiptId },
}

/// Take one job from the queue and run it through the pipeline
pub async fn process_next(
    services: &Services,
    metrics: &ServiceMetrics,
) -> Result<WorkerStep, StorageError> {
    let Some(job) = services.queue.dequeue().await? else {
        return Ok(WorkerStep::Idle);
    };
    let receipt_id = job.receipt_id;
    debug!(receipt_id = %receipt_id, delivery = job.delivery_count, "Processing receipt");

    let result = match services.pipeline.process(receipt_id).await {
        // The queue hands each receipt to one worker at a time, so a receipt
        // still processing under this job is an earlier attempt left unrecorded
        Ok(PipelineOutcome::InFlight) => services.pipeline.settle_interrupted(receipt_id).await,
        other => other,
    };

    let step = match result {
        Ok(outcome) => {
            metrics.record_pipeline_outcome(&outcome);
            services.queue.ack(&job).await?;
            WorkerStep::Completed(outcome)
        }
        Err(PipelineError::AttemptFailed { retry_after, .. }) => {
            metrics.record_pipeline_retry();
            let available_at = Timestamp::now().add_duration(retry_after);
            services.queue.release(&job, available_at).await?;
            WorkerStep::Rescheduled {
                receipt_id,
                available_at,
            }
        }
        Err(PipelineError::Storage(e)) if e.is_transient() => {
            warn!(receipt_id = %receipt_id, error = %e, "Store unavailable, job returned to queue");
            let available_at = Timestamp::now().add_duration(STORAGE_RETRY_DELAY);
            services.queue.release(&job, available_at).await?;
            WorkerStep::Rescheduled {
                receipt_id,
                available_at,
            }
        }
        Err(e) => {
            error!(receipt_id = %receipt_id, error = %e, "Dropping receipt job");
            services.queue.ack(&job).await?;
            WorkerStep::Dropped { receipt_id }
        }
    };

    if let Ok(depth) = services.queue.depth().await {
        metrics.set_queue_depth(depth);
    }
    Ok(step)
}

/// Spawn `config.workers` receipt workers
pub fn spawn_workers(
    services: Arc<Services>,
    metrics: Arc<ServiceMetrics>,
    config: &PipelineConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
    info!(workers = config.workers, poll_ms = config.poll_interval_ms, "Starting receipt workers");

    (0..config.workers)
        .map(|worker_id| {
            tokio::spawn(run_worker(
                worker_id,
                services.clone(),
                metrics.clone(),
                poll_interval,
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    services: Arc<Services>,
    metrics: Arc<ServiceMetrics>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Receipt worker started");

    while !*shutdown.borrow() {
        let idle = match process_next(&services, &metrics).await {
            Ok(WorkerStep::Idle) => true,
            Ok(_) => false,
            Err(e) => {
                error!(worker_id, error = %e, "Receipt queue error");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!(worker_id, "Receipt worker stopped");
}

/// Remove audit entries older than the retention window
pub async fn prune_expired_audit(
    audit: &dyn AuditLog,
    retention_days: u32,
    now: Timestamp,
) -> Result<usize, StorageError> {
    audit
        .prune_older_than(retention_cutoff(now, retention_days))
        .await
}

/// Spawn the periodic audit retention task; `None` when retention is off
pub fn spawn_audit_pruner(
    services: Arc<Services>,
    config: &AuditConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if config.retention_days == 0 {
        info!("Audit retention disabled");
        return None;
    }
    let retention_days = config.retention_days;
    let interval = Duration::from_secs(config.prune_interval_seconds.max(1));

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match prune_expired_audit(services.audit.as_ref(), retention_days, Timestamp::now()).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, retention_days, "Expired audit entries pruned"),
                        Err(e) => warn!(error = %e, "Audit pruning failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
