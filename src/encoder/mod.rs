//! Encoder process management
//!
//! This module provides:
//! - Argv construction from capture config
//! - OS-abstracted spawn and two-stage termination (guardian)
//! - The supervision loop feeding the init cache and the fan-out hub
//! - Cross-process device arbitration

pub mod args;
pub mod guardian;
pub mod lock;
pub mod supervisor;

pub use lock::DeviceLock;
pub use supervisor::EncoderSupervisor;
