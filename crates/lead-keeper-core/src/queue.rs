//! # Receipt Queue
//!
//! Work queue of receipt ids awaiting a processing attempt.
//!
//! Each receipt is delivered to at most one worker at a time: a dequeued job
//! stays in flight, invisible to other workers, until it is acked or
//! released. Enqueueing a receipt that is already queued or in flight is a
//! no-op.

use crate::storage::StorageError;
use crate::{ReceiptId, Timestamp};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use tracing::debug;

/// A receipt handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptJob {
    pub receipt_id: ReceiptId,
    /// How many times this job has been handed out, including this one
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
}

#[async_trait]
pub trait ReceiptQueue: Send + Sync {
    /// Queue a receipt, visible from `available_at`; returns `false` if it
    /// was already queued or in flight
    async fn enqueue(&self, receipt_id: ReceiptId, available_at: Timestamp) -> Result<bool, StorageError>;

    /// Take the next visible job, if any
    async fn dequeue(&self) -> Result<Option<ReceiptJob>, StorageError>;

    /// Finish a job
    async fn ack(&self, job: &ReceiptJob) -> Result<(), StorageError>;

    /// Return an in-flight job to the queue, visible from `available_at`
    async fn release(&self, job: &ReceiptJob, available_at: Timestamp) -> Result<(), StorageError>;

    /// Jobs queued or in flight
    async fn depth(&self) -> Result<usize, StorageError>;
}

#[derive(Debug, Clone)]
struct QueuedJob {
    available_at: Timestamp,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    queued: BTreeMap<ReceiptId, QueuedJob>,
    in_flight: BTreeMap<ReceiptId, QueuedJob>,
}

/// In-process [`ReceiptQueue`]
#[derive(Debug, Default)]
pub struct MemoryReceiptQueue {
    state: Mutex<QueueState>,
}

impl MemoryReceiptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipt ids currently in flight
    pub async fn in_flight(&self) -> BTreeSet<ReceiptId> {
        self.state.lock().await.in_flight.keys().copied().collect()
    }
}

#[async_trait]
impl ReceiptQueue for MemoryReceiptQueue {
    async fn enqueue(&self, receipt_id: ReceiptId, available_at: Timestamp) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        if state.queued.contains_key(&receipt_id) || state.in_flight.contains_key(&receipt_id) {
            debug!(receipt_id = %receipt_id, "Receipt already queued");
            return Ok(false);
        }

        state.queued.insert(
            receipt_id,
            QueuedJob {
                available_at,
                enqueued_at: Timestamp::now(),
                delivery_count: 0,
            },
        );
        Ok(true)
    }

    async fn dequeue(&self) -> Result<Option<ReceiptJob>, StorageError> {
        let now = Timestamp::now();
        let mut state = self.state.lock().await;

        let next = state
            .queued
            .iter()
            .filter(|(_, job)| job.available_at <= now)
            .min_by_key(|(id, job)| (job.available_at, **id))
            .map(|(id, _)| *id);

        let Some(receipt_id) = next else {
            return Ok(None);
        };
        let Some(mut job) = state.queued.remove(&receipt_id) else {
            return Ok(None);
        };
        job.delivery_count += 1;
        let handed_out = ReceiptJob {
            receipt_id,
            delivery_count: job.delivery_count,
            enqueued_at: job.enqueued_at,
        };
        state.in_flight.insert(receipt_id, job);
        Ok(Some(handed_out))
    }

    async fn ack(&self, job: &ReceiptJob) -> Result<(), StorageError> {
        self.state.lock().await.in_flight.remove(&job.receipt_id);
        Ok(())
    }

    async fn release(&self, job: &ReceiptJob, available_at: Timestamp) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let mut queued = state
            .in_flight
            .remove(&job.receipt_id)
            .ok_or_else(|| StorageError::not_found("queued job", job.receipt_id))?;
        queued.available_at = available_at;
        state.queued.insert(job.receipt_id, queued);
        Ok(())
    }

    async fn depth(&self) -> Result<usize, StorageError> {
        let state = self.state.lock().await;
        Ok(state.queued.len() + state.in_flight.len())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
