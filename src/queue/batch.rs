//! Batch Queue Module
//!
//! Bounded FIFO queues over cache lists. Producers push onto the head;
//! consumers read the oldest items from the tail and trim them.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::CacheGateway;
use crate::error::SyncError;
use crate::queue::{QueueItem, QueueKind, QueuePayload};

/// Default bound on each queue's length.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

// == Drained Batch ==
/// Items read from one queue, oldest first.
#[derive(Debug, Default)]
pub struct DrainedBatch {
    pub items: Vec<QueueItem>,
    /// Raw entries read, including those that failed to decode
    pub read: usize,
    /// Entries that were not valid items for this queue
    pub malformed: usize,
}

impl DrainedBatch {
    pub fn is_empty(&self) -> bool {
        self.read == 0
    }
}

// == Batch Queue ==
#[derive(Debug, Clone)]
pub struct BatchQueue {
    gateway: Arc<CacheGateway>,
    capacity: usize,
}

impl BatchQueue {
    pub fn new(gateway: Arc<CacheGateway>, capacity: usize) -> Self {
        Self {
            gateway,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // == Enqueue ==
    /// Appends a payload to its queue. Returns false if the backend rejected the push.
    ///
    /// When the queue exceeds capacity the oldest items are dropped.
    pub async fn enqueue(&self, payload: QueuePayload) -> bool {
        let item = QueueItem::new(payload);
        let kind = item.kind();
        let key = kind.key();

        let raw = match serde_json::to_string(&item) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(queue = %kind, error = %err, "could not encode queue item");
                return false;
            }
        };

        let len = match self.gateway.backend().lpush(&key, &[raw]).await {
            Ok(len) => len,
            Err(err) => {
                self.gateway.note_failure("lpush", &key, &err);
                return false;
            }
        };

        if len > self.capacity {
            let overflow = SyncError::QueueOverflow {
                queue: key.clone(),
                dropped: len - self.capacity,
            };
            match self
                .gateway
                .backend()
                .ltrim(&key, 0, self.capacity as i64 - 1)
                .await
            {
                Ok(()) => warn!("{}", overflow),
                Err(err) => self.gateway.note_failure("ltrim", &key, &err),
            }
        }
        debug!(queue = %kind, id = %item.id, "enqueued");
        true
    }

    // == Peek ==
    /// Reads up to `max_items` of the oldest items without removing them.
    pub async fn peek(&self, kind: QueueKind, max_items: usize) -> DrainedBatch {
        if max_items == 0 {
            return DrainedBatch::default();
        }
        let key = kind.key();
        let mut raw = match self
            .gateway
            .backend()
            .lrange(&key, -(max_items as i64), -1)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                self.gateway.note_failure("lrange", &key, &err);
                return DrainedBatch::default();
            }
        };
        // The tail holds the oldest entry
        raw.reverse();

        let mut batch = DrainedBatch {
            read: raw.len(),
            ..Default::default()
        };
        for entry in raw {
            match serde_json::from_str::<QueueItem>(&entry) {
                Ok(item) if item.kind() == kind => batch.items.push(item),
                Ok(item) => {
                    batch.malformed += 1;
                    warn!(queue = %kind, id = %item.id, found = %item.kind(), "item on wrong queue, skipping");
                }
                Err(err) => {
                    batch.malformed += 1;
                    warn!(queue = %kind, error = %err, "malformed queue entry, skipping");
                }
            }
        }
        batch
    }

    // == Acknowledge ==
    /// Removes `count` items from the tail, i.e. the oldest ones previously peeked.
    pub async fn ack(&self, kind: QueueKind, count: usize) -> bool {
        if count == 0 {
            return true;
        }
        let key = kind.key();
        match self
            .gateway
            .backend()
            .ltrim(&key, 0, -(count as i64) - 1)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                self.gateway.note_failure("ltrim", &key, &err);
                false
            }
        }
    }

    // == Drain ==
    /// Reads the oldest `max_items` and trims them immediately.
    ///
    /// A consumer that crashes mid-batch loses those items from the queue, so
    /// trimming before processing relies on the durable intent already being
    /// recoverable elsewhere; a trim failure means they will be redelivered.
    pub async fn drain(&self, kind: QueueKind, max_items: usize) -> DrainedBatch {
        let batch = self.peek(kind, max_items).await;
        if !batch.is_empty() && !self.ack(kind, batch.read).await {
            warn!(queue = %kind, count = batch.read, "trim failed, batch may be redelivered");
        }
        batch
    }

    pub async fn len(&self, kind: QueueKind) -> usize {
        let key = kind.key();
        match self.gateway.backend().llen(&key).await {
            Ok(len) => len,
            Err(err) => {
                self.gateway.note_failure("llen", &key, &err);
                0
            }
        }
    }

    /// Length of every queue, for inspection.
    pub async fn depths(&self) -> Vec<(QueueKind, usize)> {
        let mut depths = Vec::with_capacity(QueueKind::ALL.len());
        for kind in QueueKind::ALL {
            depths.push((kind, self.len(kind).await));
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::cache::{CacheBackend, MemoryBackend};
    use crate::queue::{TimedOut, TimerSync};

    fn queue_with(backend: &MemoryBackend, capacity: usize) -> BatchQueue {
        let gateway = Arc::new(CacheGateway::new(Arc::new(backend.clone())));
        BatchQueue::new(gateway, capacity)
    }

    fn timed_out(attempt: &str) -> QueuePayload {
        QueuePayload::TimedOut(TimedOut {
            attempt_id: attempt.to_string(),
        })
    }

    fn attempt_ids(batch: &DrainedBatch) -> Vec<String> {
        batch
            .items
            .iter()
            .map(|item| match &item.payload {
                QueuePayload::TimedOut(t) => t.attempt_id.clone(),
                other => panic!("unexpected payload {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_drain_is_oldest_first_and_trims() {
        let backend = MemoryBackend::new(100);
        let queue = queue_with(&backend, 100);
        for id in ["a1", "a2", "a3", "a4"] {
            assert!(queue.enqueue(timed_out(id)).await);
        }

        let first = queue.drain(QueueKind::TimedOut, 3).await;
        assert_eq!(attempt_ids(&first), vec!["a1", "a2", "a3"]);
        assert_eq!(queue.len(QueueKind::TimedOut).await, 1);

        let second = queue.drain(QueueKind::TimedOut, 3).await;
        assert_eq!(attempt_ids(&second), vec!["a4"]);
        assert!(queue.drain(QueueKind::TimedOut, 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_peek_does_not_remove_until_ack() {
        let backend = MemoryBackend::new(100);
        let queue = queue_with(&backend, 100);
        queue.enqueue(timed_out("a1")).await;
        queue.enqueue(timed_out("a2")).await;

        let batch = queue.peek(QueueKind::TimedOut, 10).await;
        assert_eq!(batch.items.len(), 2);
        assert_eq!(queue.len(QueueKind::TimedOut).await, 2);

        // a producer pushes while the batch is in flight
        queue.enqueue(timed_out("a3")).await;
        assert!(queue.ack(QueueKind::TimedOut, batch.read).await);

        let rest = queue.drain(QueueKind::TimedOut, 10).await;
        assert_eq!(attempt_ids(&rest), vec!["a3"]);
    }

    #[tokio::test]
    async fn test_capacity_keeps_most_recent_items() {
        let backend = MemoryBackend::new(100);
        let queue = queue_with(&backend, 3);
        for i in 0..5 {
            queue.enqueue(timed_out(&format!("a{i}"))).await;
        }

        assert_eq!(queue.len(QueueKind::TimedOut).await, 3);
        let batch = queue.drain(QueueKind::TimedOut, 10).await;
        assert_eq!(attempt_ids(&batch), vec!["a2", "a3", "a4"]);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let backend = MemoryBackend::new(100);
        let queue = queue_with(&backend, 100);
        queue.enqueue(timed_out("a1")).await;
        queue
            .enqueue(QueuePayload::TimerSync(TimerSync {
                attempt_id: "a1".to_string(),
                user_id: "u1".to_string(),
                time_remaining_secs: 30,
                timestamp: Utc::now(),
            }))
            .await;

        let depths = queue.depths().await;
        assert!(depths.contains(&(QueueKind::TimedOut, 1)));
        assert!(depths.contains(&(QueueKind::TimerSync, 1)));
        assert!(depths.contains(&(QueueKind::AnswerUpdate, 0)));
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped_and_trimmed() {
        let backend = MemoryBackend::new(100);
        let queue = queue_with(&backend, 100);
        queue.enqueue(timed_out("a1")).await;
        backend
            .lpush(&QueueKind::TimedOut.key(), &["{garbage".to_string()])
            .await
            .unwrap();
        queue.enqueue(timed_out("a2")).await;

        let batch = queue.drain(QueueKind::TimedOut, 10).await;
        assert_eq!(batch.read, 3);
        assert_eq!(batch.malformed, 1);
        assert_eq!(attempt_ids(&batch), vec!["a1", "a2"]);
        assert_eq!(queue.len(QueueKind::TimedOut).await, 0);
    }
}
