//! Bounded drop-oldest chunk queue
//!
//! The delivery path between the encoder read loop and each session writer.
//! Pushes never block: when the queue is full the oldest chunk is discarded
//! and a drop counter bumped, keeping the queue biased toward recency — the
//! right trade for live viewing. The consumer side is async.
//!
//! Cloning a `ChunkQueue` clones a handle to the same queue; the hub holds
//! one handle for pushing, the session writer another for popping.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::{QUEUE_CAPACITY_MAX, QUEUE_CAPACITY_MIN};

/// Handle to a bounded drop-oldest queue of stream chunks
#[derive(Clone)]
pub struct ChunkQueue {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    items: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl ChunkQueue {
    /// Create a queue with the given capacity (clamped to 2..=4096)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(QUEUE_CAPACITY_MIN, QUEUE_CAPACITY_MAX);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity.min(64)),
                    capacity,
                    dropped: 0,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a chunk, discarding the oldest entry if full.
    ///
    /// Returns `false` if the queue has been closed.
    pub fn push(&self, chunk: Bytes) -> bool {
        {
            let mut state = self.shared.state.lock().expect("chunk queue lock poisoned");
            if state.closed {
                return false;
            }
            if state.items.len() == state.capacity {
                state.items.pop_front();
                state.dropped += 1;
            }
            state.items.push_back(chunk);
        }
        self.shared.notify.notify_one();
        true
    }

    /// Dequeue the next chunk, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained. Cancel-safe: a
    /// dropped `pop` future never loses a chunk.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            // Arm the wakeup before checking state so a push between the
            // check and the await cannot be missed.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().expect("chunk queue lock poisoned");
                if let Some(chunk) = state.items.pop_front() {
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue: pending chunks remain poppable, new pushes fail,
    /// and blocked consumers wake up.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock().expect("chunk queue lock poisoned");
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().expect("chunk queue lock poisoned").closed
    }

    /// Number of chunks currently queued
    pub fn len(&self) -> usize {
        self.shared.state.lock().expect("chunk queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total chunks discarded by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().expect("chunk queue lock poisoned").dropped
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().expect("chunk queue lock poisoned").capacity
    }
}
