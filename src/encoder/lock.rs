//! Per-device arbitration lock
//!
//! Exactly one worker may own a capture device. The lock is a system-wide
//! exclusively-created file named by the first 16 hex characters of
//! SHA-256 of the device identifier, so two instances configured with the
//! same device collide regardless of how the identifier is spelled into
//! their configs. Held for the life of the process; released on drop.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Derive the lock name for a device identifier
pub fn lock_name(device: &str) -> String {
    let digest = Sha256::digest(device.as_bytes());
    let mut name = String::with_capacity(16);
    for byte in &digest[..8] {
        name.push_str(&format!("{byte:02x}"));
    }
    name
}

/// Exclusive ownership of one capture device
#[derive(Debug)]
pub struct DeviceLock {
    path: PathBuf,
}

impl DeviceLock {
    /// Acquire the lock, failing hard if another instance holds it.
    ///
    /// TODO: reclaim stale lock files left behind by a crashed worker
    /// (check whether the recorded pid is still alive).
    pub fn acquire(device: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("tinycam-{}.lock", lock_name(device)));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                tracing::debug!(path = %path.display(), "Device lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::Resource(
                format!("device '{device}' is held by another worker ({})", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_device(tag: &str) -> String {
        format!("test-device-{}-{}", std::process::id(), tag)
    }

    #[test]
    fn test_lock_name_is_16_hex() {
        let name = lock_name("/dev/video0");
        assert_eq!(name.len(), 16);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));

        // Deterministic and device-specific
        assert_eq!(name, lock_name("/dev/video0"));
        assert_ne!(name, lock_name("/dev/video1"));
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let device = unique_device("contend");
        let held = DeviceLock::acquire(&device).unwrap();

        let err = DeviceLock::acquire(&device).unwrap_err();
        assert!(matches!(err, Error::Resource(_)));

        drop(held);
        let reacquired = DeviceLock::acquire(&device);
        assert!(reacquired.is_ok());
    }

    #[test]
    fn test_different_devices_do_not_contend() {
        let _a = DeviceLock::acquire(&unique_device("a")).unwrap();
        let _b = DeviceLock::acquire(&unique_device("b")).unwrap();
    }
}
