//! Init-segment cache
//!
//! A late-joining client cannot decode mid-stream: it first needs the
//! container's initialization prefix. The cache buffers the head of each
//! encoder run (up to a fixed cap), runs the container scanner over it as
//! bytes arrive, and publishes an immutable snapshot once the prefix is
//! complete. Sessions replay the snapshot before their first live chunk.
//!
//! The cache is reset at the start of every encoder run; the snapshot is
//! cut at most once per run. Bytes past the cap are ignored for detection
//! purposes only — live fan-out is unaffected.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};

use crate::config::ContainerKind;
use crate::media::container;

/// Head-buffer capacity: no real init prefix comes close to this
pub const HEAD_CAP: usize = 2 * 1024 * 1024;

/// Caches the stream head and publishes the init snapshot
pub struct InitCache {
    inner: Mutex<Inner>,
}

struct Inner {
    kind: ContainerKind,
    head: BytesMut,
    snapshot: Bytes,
    done: bool,
}

impl InitCache {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            inner: Mutex::new(Inner {
                kind,
                head: BytesMut::new(),
                snapshot: Bytes::new(),
                done: false,
            }),
        }
    }

    /// Feed the next stdout chunk. Cheap once the snapshot is cut or the
    /// head cap is reached.
    pub fn feed(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock().expect("init cache lock poisoned");
        if inner.done || inner.head.len() >= HEAD_CAP {
            return;
        }

        let room = HEAD_CAP - inner.head.len();
        inner.head.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let snapshot = match inner.kind {
            ContainerKind::Cluster => container::find_cluster_init(&inner.head)
                .map(|range| Bytes::copy_from_slice(&inner.head[range])),
            ContainerKind::Boxed => container::find_boxed_init(&inner.head)
                .map(|end| Bytes::copy_from_slice(&inner.head[..end])),
        };

        if let Some(snapshot) = snapshot {
            tracing::info!(
                kind = ?inner.kind,
                bytes = snapshot.len(),
                "Init segment captured"
            );
            inner.snapshot = snapshot;
            inner.done = true;
            // Head bytes are no longer needed once the snapshot is cut
            inner.head = BytesMut::new();
        }
    }

    /// The published snapshot; empty until the prefix is complete.
    ///
    /// Clones are reference-counted views of the same allocation.
    pub fn snapshot(&self) -> Bytes {
        self.inner.lock().expect("init cache lock poisoned").snapshot.clone()
    }

    /// Whether a snapshot has been published for the current run
    pub fn is_ready(&self) -> bool {
        self.inner.lock().expect("init cache lock poisoned").done
    }

    /// Container kind this cache is scanning for
    pub fn kind(&self) -> ContainerKind {
        self.inner.lock().expect("init cache lock poisoned").kind
    }

    /// Clear all state for a new encoder run, optionally switching container
    pub fn reset(&self, kind: ContainerKind) {
        let mut inner = self.inner.lock().expect("init cache lock poisoned");
        inner.kind = kind;
        inner.head = BytesMut::new();
        inner.snapshot = Bytes::new();
        inner.done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::container::{CLUSTER_DOC_SIGNATURE, CLUSTER_MARK_SIGNATURE};

    fn cluster_stream() -> Vec<u8> {
        let mut buf = vec![0xEE, 0xEE];
        buf.extend_from_slice(&CLUSTER_DOC_SIGNATURE);
        buf.extend_from_slice(&[0xAA, 0xBB]);
        buf.extend_from_slice(&CLUSTER_MARK_SIGNATURE);
        buf.push(0xCC);
        buf
    }

    #[test]
    fn test_cluster_snapshot_bounds() {
        let cache = InitCache::new(ContainerKind::Cluster);
        cache.feed(&cluster_stream());

        assert!(cache.is_ready());
        assert_eq!(
            &cache.snapshot()[..],
            &[0x1A, 0x45, 0xDF, 0xA3, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_empty_until_both_signatures_seen() {
        let cache = InitCache::new(ContainerKind::Cluster);
        let stream = cluster_stream();

        // Feed byte by byte; the snapshot appears exactly when the last
        // byte of the cluster marker lands (index 11: 2 junk + 4 header
        // signature + 2 payload + 4 marker).
        for (i, byte) in stream.iter().enumerate() {
            cache.feed(std::slice::from_ref(byte));
            assert_eq!(cache.is_ready(), i >= 11, "wrong readiness at byte {i}");
        }
    }

    #[test]
    fn test_boxed_snapshot_is_whole_prefix() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&12u32.to_be_bytes());
        stream.extend_from_slice(b"ftyp");
        stream.extend_from_slice(b"isom");
        stream.extend_from_slice(&16u32.to_be_bytes());
        stream.extend_from_slice(b"moov");
        stream.extend_from_slice(&[0u8; 8]);
        let init_len = stream.len();
        stream.extend_from_slice(&16u32.to_be_bytes());
        stream.extend_from_slice(b"moof");
        stream.extend_from_slice(&[0u8; 8]);

        let cache = InitCache::new(ContainerKind::Boxed);

        // Split the feed mid-moov to exercise incremental parsing
        cache.feed(&stream[..20]);
        assert!(!cache.is_ready());
        cache.feed(&stream[20..]);

        assert_eq!(&cache.snapshot()[..], &stream[..init_len]);
    }

    #[test]
    fn test_snapshot_cut_at_most_once() {
        let cache = InitCache::new(ContainerKind::Cluster);
        cache.feed(&cluster_stream());
        let first = cache.snapshot();

        // A second header+marker pair later in the stream must not move it
        cache.feed(&cluster_stream());
        assert_eq!(cache.snapshot(), first);
    }

    #[test]
    fn test_reset_clears_snapshot() {
        let cache = InitCache::new(ContainerKind::Cluster);
        cache.feed(&cluster_stream());
        assert!(cache.is_ready());

        cache.reset(ContainerKind::Cluster);
        assert!(!cache.is_ready());
        assert!(cache.snapshot().is_empty());

        cache.feed(&cluster_stream());
        assert!(cache.is_ready());
    }

    #[test]
    fn test_head_cap_bounds_detection() {
        let cache = InitCache::new(ContainerKind::Cluster);
        cache.feed(&vec![0u8; HEAD_CAP]);

        // Cap reached without an init prefix; later bytes are ignored
        cache.feed(&cluster_stream());
        assert!(!cache.is_ready());
        assert!(cache.snapshot().is_empty());
    }
}
