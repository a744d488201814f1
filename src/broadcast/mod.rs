//! Chunk fan-out to live subscribers
//!
//! # Architecture
//!
//! ```text
//!                        Arc<Hub>
//!               ┌──────────────────────────┐
//!               │ subscribers:             │
//!               │   HashMap<u64,           │
//!               │     ChunkQueue>          │
//!               └────────────┬─────────────┘
//!                            │ broadcast(Bytes)
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!    [ChunkQueue]      [ChunkQueue]      [ChunkQueue]
//!    drop-oldest       drop-oldest       drop-oldest
//!          │                 │                 │
//!     session writer    session writer    session writer
//! ```
//!
//! Every queue holds reference-counted `bytes::Bytes`, so fan-out shares
//! one allocation per chunk regardless of subscriber count.

pub mod hub;
pub mod queue;

pub use hub::Hub;
pub use queue::ChunkQueue;
