//! Wiring of the domain services over one store and one queue

use crate::config::ServiceConfig;
use lead_keeper_core::storage::{FailureStore, ReceiptFilter, ReceiptStore, StorageError};
use lead_keeper_core::{
    ActivityService, AuditLog, AuditSubscriber, ContactService, DealService, EventDispatcher,
    IngestionService, MemoryCrmStore, MemoryReceiptQueue, NotificationSubscriber,
    OutboxNotifier, ReceiptQueue, TimelineService, WebhookPipeline,
};
use std::sync::Arc;
use tracing::info;

/// Every service the handlers and workers use
pub struct Services {
    pub receipts: Arc<dyn ReceiptStore>,
    pub failures: Arc<dyn FailureStore>,
    pub audit: Arc<dyn AuditLog>,
    pub queue: Arc<dyn ReceiptQueue>,
    pub outbox: Arc<OutboxNotifier>,
    pub ingestion: IngestionService,
    pub pipeline: WebhookPipeline,
    pub deals: DealService,
    pub contacts: ContactService,
    pub activity: ActivityService,
    pub timeline: TimelineService,
}

impl Services {
    /// Build services over the configured store
    ///
    /// Uses a JSON snapshot when `storage.snapshot_path` is set, otherwise
    /// keeps everything in memory.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self, StorageError> {
        let store = match &config.storage.snapshot_path {
            Some(path) => {
                info!(path = %path.display(), "Using snapshot-backed store");
                MemoryCrmStore::with_snapshot(path.clone()).await?
            }
            None => {
                info!("Using in-memory store");
                MemoryCrmStore::new()
            }
        };
        Ok(Self::with_store(
            Arc::new(store),
            Arc::new(MemoryReceiptQueue::new()),
            config,
        ))
    }

    /// Build services over an explicit store and queue
    pub fn with_store(
        store: Arc<MemoryCrmStore>,
        queue: Arc<dyn ReceiptQueue>,
        config: &ServiceConfig,
    ) -> Self {
        let outbox = Arc::new(OutboxNotifier::new());
        let events = Arc::new(
            EventDispatcher::new()
                .with_subscriber(Arc::new(AuditSubscriber::new(store.clone())))
                .with_subscriber(Arc::new(NotificationSubscriber::new(
                    config.notifications.clone(),
                    outbox.clone(),
                ))),
        );

        Self {
            receipts: store.clone(),
            failures: store.clone(),
            audit: store.clone(),
            queue: queue.clone(),
            outbox,
            ingestion: IngestionService::new(store.clone(), queue),
            pipeline: WebhookPipeline::new(
                store.clone(),
                store.clone(),
                store.clone(),
                events.clone(),
                config.pipeline.retry.clone(),
            ),
            deals: DealService::new(store.clone(), store.clone(), events.clone()),
            contacts: ContactService::new(store.clone(), events.clone()),
            activity: ActivityService::new(store.clone(), store.clone(), events),
            timeline: TimelineService::new(store.clone(), store.clone(), store.clone(), store),
        }
    }

    /// Check the store answers reads
    pub async fn check_store(&self) -> Result<(), StorageError> {
        self.receipts
            .list(ReceiptFilter {
                status: None,
                limit: Some(1),
            })
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
