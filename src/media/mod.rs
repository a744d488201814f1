//! Container handling
//!
//! This module provides:
//! - Minimal cluster/box container prefix scanners
//! - The init-segment cache that primes late-joining subscribers

pub mod container;
pub mod init_cache;

pub use container::{find_boxed_init, find_cluster_init};
pub use init_cache::{InitCache, HEAD_CAP};
