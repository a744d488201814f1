//! Media buffer sinks
//!
//! Where decrypted stream chunks land on the client. The sink is
//! container-agnostic: it only appends bytes in arrival order and applies a
//! retention policy, the way a player feeds a media source buffer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::Result;

/// How much buffered media the sink keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Never trim (short sessions, archiving)
    Grow,
    /// Keep roughly the trailing window, trimming older slices
    Window(Duration),
}

impl Retention {
    /// Window retention expressed in minutes
    pub fn window_minutes(minutes: u64) -> Self {
        Retention::Window(Duration::from_secs(minutes * 60))
    }
}

/// Consumer of decrypted stream chunks
pub trait MediaSink: Send {
    /// Append one decrypted chunk
    fn append(&mut self, chunk: Bytes) -> Result<()>;

    /// Called once, right after the first successful append. Players use
    /// this to seek to the live edge if the underlying element came up
    /// paused; the default does nothing.
    fn on_first_append(&mut self) {}

    /// Periodic retention pass
    fn trim(&mut self) {}
}

/// In-memory sink with the two retention modes
pub struct BufferSink {
    slices: VecDeque<(Instant, Bytes)>,
    retention: Retention,
    total_bytes: usize,
    appends: u64,
}

impl BufferSink {
    pub fn new(retention: Retention) -> Self {
        Self {
            slices: VecDeque::new(),
            retention,
            total_bytes: 0,
            appends: 0,
        }
    }

    /// Bytes currently buffered
    pub fn byte_len(&self) -> usize {
        self.total_bytes
    }

    /// Number of buffered slices
    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Total appends over the sink's lifetime
    pub fn appends(&self) -> u64 {
        self.appends
    }

    /// Concatenate the buffered content (testing and archiving)
    pub fn contents(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for (_, slice) in &self.slices {
            out.extend_from_slice(slice);
        }
        out
    }
}

impl MediaSink for BufferSink {
    fn append(&mut self, chunk: Bytes) -> Result<()> {
        self.total_bytes += chunk.len();
        self.appends += 1;
        self.slices.push_back((Instant::now(), chunk));
        Ok(())
    }

    fn trim(&mut self) {
        let Retention::Window(window) = self.retention else {
            return;
        };
        while let Some((stamp, slice)) = self.slices.front() {
            if stamp.elapsed() <= window {
                break;
            }
            self.total_bytes -= slice.len();
            self.slices.pop_front();
        }
    }
}
