//! Client-side protocol mirror
//!
//! This module provides:
//! - The player: handshake, record verification/decryption, health loop
//! - Media sinks with grow/window retention

pub mod player;
pub mod sink;

pub use player::{Player, PlayerConfig};
pub use sink::{BufferSink, MediaSink, Retention};
