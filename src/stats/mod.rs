//! Statistics and counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Per-session counters, owned by the session's writer task
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Encrypted records sent, preroll included
    pub frames_sent: u64,
    /// Wire bytes sent
    pub bytes_sent: u64,
    /// Preroll (init-segment) records among `frames_sent`
    pub preroll_frames: u64,
    /// Chunks discarded by the outbound queue's drop-oldest policy
    pub dropped_chunks: u64,
}

/// Worker-wide totals, shared across sessions
#[derive(Debug)]
pub struct ServerStats {
    pub sessions_total: AtomicU64,
    pub sessions_active: AtomicU64,
    pub frames_sent_total: AtomicU64,
    pub bytes_sent_total: AtomicU64,
    pub auth_failures: AtomicU64,
    started_at: Instant,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            frames_sent_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Fold one finished session's counters into the totals
    pub fn absorb_session(&self, session: &SessionStats) {
        self.frames_sent_total
            .fetch_add(session.frames_sent, Ordering::Relaxed);
        self.bytes_sent_total
            .fetch_add(session.bytes_sent, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
