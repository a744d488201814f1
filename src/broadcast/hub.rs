//! Subscriber fan-out
//!
//! The hub owns the map from subscriber id to delivery queue. A session
//! holds only its id, which breaks any reference cycle between the two:
//! unsubscribing removes the entry and nothing outlives it.
//!
//! `broadcast` snapshots the queue handles under the lock and pushes
//! outside it, so a slow subscriber can never stall the encoder read loop
//! or its peers — its own queue just drops oldest.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

use super::queue::ChunkQueue;

/// Fan-out point between the encoder read loop and session queues
pub struct Hub {
    inner: Mutex<Inner>,
}

struct Inner {
    subscribers: HashMap<u64, ChunkQueue>,
    next_id: u64,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a delivery queue; returns the subscriber id.
    ///
    /// The caller may pre-load the queue (init preroll) before attaching so
    /// those chunks are ordered ahead of the first live chunk.
    pub fn subscribe(&self, queue: ChunkQueue) -> u64 {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, queue);

        tracing::debug!(subscriber_id = id, total = inner.subscribers.len(), "Subscriber added");
        id
    }

    /// Remove a subscriber and close its queue
    pub fn unsubscribe(&self, id: u64) {
        let removed = {
            let mut inner = self.inner.lock().expect("hub lock poisoned");
            inner.subscribers.remove(&id)
        };
        if let Some(queue) = removed {
            queue.close();
            tracing::debug!(subscriber_id = id, "Subscriber removed");
        }
    }

    /// Deliver one chunk to every subscriber's queue.
    ///
    /// Returns the number of queues the chunk was enqueued to. The `Bytes`
    /// clone is reference-counted, not a copy.
    pub fn broadcast(&self, chunk: Bytes) -> usize {
        let queues: Vec<ChunkQueue> = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.subscribers.values().cloned().collect()
        };

        let mut delivered = 0;
        for queue in &queues {
            if queue.push(chunk.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every subscriber queue and clear the map.
    ///
    /// Used when the encoder run ends: attached sessions observe their
    /// queue closing and tear down; reconnecting clients get the new init.
    pub fn close_all(&self) {
        let queues: Vec<ChunkQueue> = {
            let mut inner = self.inner.lock().expect("hub lock poisoned");
            inner.subscribers.drain().map(|(_, q)| q).collect()
        };
        for queue in &queues {
            queue.close();
        }
        if !queues.is_empty() {
            tracing::info!(count = queues.len(), "All subscribers detached");
        }
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").subscribers.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> Bytes {
        Bytes::from(vec![tag])
    }

    #[tokio::test]
    async fn test_subscribe_broadcast_unsubscribe() {
        let hub = Hub::new();
        let queue = ChunkQueue::new(8);
        let id = hub.subscribe(queue.clone());

        assert_eq!(hub.broadcast(chunk(1)), 1);
        assert_eq!(queue.pop().await.unwrap()[0], 1);

        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.broadcast(chunk(2)), 0);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let hub = Hub::new();
        let a = hub.subscribe(ChunkQueue::new(4));
        let b = hub.subscribe(ChunkQueue::new(4));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_peers() {
        let hub = Hub::new();
        let slow = ChunkQueue::new(2);
        let fast = ChunkQueue::new(64);
        hub.subscribe(slow.clone());
        hub.subscribe(fast.clone());

        for tag in 0..10u8 {
            hub.broadcast(chunk(tag));
        }

        // The slow queue dropped to stay within capacity; the fast one got
        // every chunk regardless.
        assert_eq!(slow.dropped(), 8);
        assert_eq!(slow.len(), 2);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(fast.len(), 10);

        // Slow subscriber kept the most recent chunks, in order
        assert_eq!(slow.pop().await.unwrap()[0], 8);
        assert_eq!(slow.pop().await.unwrap()[0], 9);
    }

    #[tokio::test]
    async fn test_preloaded_queue_orders_preroll_first() {
        let hub = Hub::new();
        let queue = ChunkQueue::new(8);
        queue.push(chunk(100)); // preroll slice
        hub.subscribe(queue.clone());
        hub.broadcast(chunk(1));

        assert_eq!(queue.pop().await.unwrap()[0], 100);
        assert_eq!(queue.pop().await.unwrap()[0], 1);
    }

    #[tokio::test]
    async fn test_close_all_detaches_and_closes() {
        let hub = Hub::new();
        let queue = ChunkQueue::new(4);
        hub.subscribe(queue.clone());

        hub.close_all();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(queue.is_closed());
        assert!(queue.pop().await.is_none());
    }
}
