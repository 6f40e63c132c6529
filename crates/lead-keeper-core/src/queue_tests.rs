use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_dequeue_hands_out_each_job_once() {
    let queue = MemoryReceiptQueue::new();
    let id = ReceiptId::new();
    queue.enqueue(id, Timestamp::now()).await.unwrap();

    let job = queue.dequeue().await.unwrap().unwrap();

    assert_eq!(job.receipt_id, id);
    assert_eq!(job.delivery_count, 1);
    assert!(queue.dequeue().await.unwrap().is_none());
    assert_eq!(queue.depth().await.unwrap(), 1);

    queue.ack(&job).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 0);
}

/// Verify that a receipt cannot be queued twice
#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let queue = MemoryReceiptQueue::new();
    let id = ReceiptId::new();

    assert!(queue.enqueue(id, Timestamp::now()).await.unwrap());
    assert!(!queue.enqueue(id, Timestamp::now()).await.unwrap());

    let job = queue.dequeue().await.unwrap().unwrap();
    assert!(!queue.enqueue(id, Timestamp::now()).await.unwrap());
    assert!(queue.in_flight().await.contains(&job.receipt_id));
}

#[tokio::test]
async fn test_future_jobs_are_invisible() {
    let queue = MemoryReceiptQueue::new();
    let later = Timestamp::now().add_duration(Duration::from_secs(60));
    queue.enqueue(ReceiptId::new(), later).await.unwrap();

    assert!(queue.dequeue().await.unwrap().is_none());
    assert_eq!(queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_release_requeues_with_delay() {
    let queue = MemoryReceiptQueue::new();
    let id = ReceiptId::new();
    queue.enqueue(id, Timestamp::now()).await.unwrap();
    let job = queue.dequeue().await.unwrap().unwrap();

    queue
        .release(&job, Timestamp::now().add_duration(Duration::from_secs(60)))
        .await
        .unwrap();
    assert!(queue.dequeue().await.unwrap().is_none());

    queue
        .release(&job, Timestamp::now())
        .await
        .expect_err("job is no longer in flight");
}

#[tokio::test]
async fn test_released_job_counts_deliveries() {
    let queue = MemoryReceiptQueue::new();
    let id = ReceiptId::new();
    queue.enqueue(id, Timestamp::now()).await.unwrap();
    let first = queue.dequeue().await.unwrap().unwrap();
    queue.release(&first, Timestamp::now()).await.unwrap();

    let second = queue.dequeue().await.unwrap().unwrap();

    assert_eq!(second.receipt_id, id);
    assert_eq!(second.delivery_count, 2);
}

#[tokio::test]
async fn test_earliest_available_first() {
    let queue = MemoryReceiptQueue::new();
    let now = Timestamp::now();
    let older = ReceiptId::new();
    let newer = ReceiptId::new();
    queue
        .enqueue(newer, now.subtract_duration(Duration::from_secs(1)))
        .await
        .unwrap();
    queue
        .enqueue(older, now.subtract_duration(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(queue.dequeue().await.unwrap().unwrap().receipt_id, older);
}
