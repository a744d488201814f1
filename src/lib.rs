//! TinyCam worker: single-host secure camera streaming
//!
//! Supervises an external video encoder that captures from a local camera
//! device and fans its live container stream out to authenticated WebSocket
//! clients as per-frame authenticated-encrypted records.
//!
//! # Data flow
//!
//! ```text
//!  encoder stdout ──► InitCache (init-segment sniffing)
//!        │
//!        └──► Hub ──► per-session ChunkQueue ──► FrameSealer ──► WebSocket
//!                                                                   │
//!                                  client: FrameOpener ◄── network ◄┘
//!                                      │
//!                                      └──► MediaSink
//! ```
//!
//! Every hop carries reference-counted [`bytes::Bytes`]; a chunk is
//! allocated once no matter how many subscribers are attached.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod crypto;
pub mod encoder;
pub mod error;
pub mod keys;
pub mod media;
pub mod server;
pub mod stats;
pub mod stream;

pub use config::{ContainerKind, EncoderConfig, ServerConfig, SupervisorConfig};
pub use error::{Error, Result};
pub use keys::KeyStore;
