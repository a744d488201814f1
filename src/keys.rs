//! Key material at rest
//!
//! The worker keeps two 32-byte symmetric keys in a small JSON file:
//! `accessKey` authenticates streaming clients and seeds the per-session key
//! derivation; `managementKey` signs control-plane requests (consumed
//! elsewhere, but part of the file contract). The file is generated with
//! fresh random material when absent.

use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::b64;
use crate::error::{Error, Result};

/// Length of each key in bytes
pub const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(rename = "managementKey")]
    management_key: String,
    #[serde(rename = "accessKey")]
    access_key: String,
}

/// Process-wide key material, loaded once at startup
pub struct KeyStore {
    management_key: [u8; KEY_LEN],
    access_key: [u8; KEY_LEN],
    path: PathBuf,
}

impl KeyStore {
    /// Load the key file, generating and persisting fresh keys if it does
    /// not exist yet.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: KeyFile = serde_json::from_str(&raw)?;
            let store = Self {
                management_key: decode_key(&file.management_key, "managementKey")?,
                access_key: decode_key(&file.access_key, "accessKey")?,
                path,
            };
            tracing::info!(path = %store.path.display(), "Key file loaded");
            Ok(store)
        } else {
            let store = Self {
                management_key: random_key(),
                access_key: random_key(),
                path,
            };
            store.persist()?;
            tracing::info!(path = %store.path.display(), "Key file generated");
            Ok(store)
        }
    }

    /// The data-plane pre-shared key
    pub fn access_key(&self) -> &[u8; KEY_LEN] {
        &self.access_key
    }

    /// The control-plane pre-shared key
    pub fn management_key(&self) -> &[u8; KEY_LEN] {
        &self.management_key
    }

    /// Replace the access key with fresh random material and persist.
    ///
    /// New connections authenticate against the rotated key; sessions that
    /// already derived their key are unaffected.
    pub fn rotate_access_key(&mut self) -> Result<()> {
        self.access_key = random_key();
        self.persist()?;
        tracing::info!("Access key rotated");
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let file = KeyFile {
            management_key: b64::encode(&self.management_key),
            access_key: b64::encode(&self.access_key),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("path", &self.path)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

fn decode_key(encoded: &str, field: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = b64::decode_relaxed(encoded)
        .map_err(|e| Error::Keys(format!("{field} is not valid base64: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Keys(format!("{field} must decode to {KEY_LEN} bytes")))
}
