//! Per-session key derivation and frame AEAD
//!
//! Both ends derive the same 32-byte session key from the pre-shared access
//! key and the two handshake nonces, then exchange binary records:
//!
//! ```text
//! | 0            12             28             N |
//! |  nonce (12)  |   tag (16)   | ciphertext ... |
//! ```
//!
//! The nonce is `conn_id (4) || counter (8, big-endian)`. The counter is
//! strictly increasing per session, so a receiver that enforces it rejects
//! replays for free. The associated data binds connection id, expiry, and
//! stream parameters so a record cannot be spliced into another session.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bytes::{BufMut, Bytes, BytesMut};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Derived session key length
pub const SESSION_KEY_LEN: usize = 32;

/// Wire nonce length
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length (128-bit tags)
pub const TAG_LEN: usize = 16;

/// Connection-id prefix length inside the nonce
pub const CONN_ID_LEN: usize = 4;

/// Smallest well-formed record: nonce + tag around an empty ciphertext
pub const MIN_RECORD_LEN: usize = NONCE_LEN + TAG_LEN;

/// Domain-separation string for the session key derivation
pub const HKDF_INFO: &[u8] = b"tinycam hkdf v1";

/// Handshake nonce length (client and server halves of the salt)
pub const HANDSHAKE_NONCE_LEN: usize = 16;

/// Derive the session key: `HKDF-SHA256(ikm=psk, salt=cnonce||snonce)`
pub fn derive_session_key(
    psk: &[u8; 32],
    cnonce: &[u8; HANDSHAKE_NONCE_LEN],
    snonce: &[u8; HANDSHAKE_NONCE_LEN],
) -> [u8; SESSION_KEY_LEN] {
    let mut salt = [0u8; HANDSHAKE_NONCE_LEN * 2];
    salt[..HANDSHAKE_NONCE_LEN].copy_from_slice(cnonce);
    salt[HANDSHAKE_NONCE_LEN..].copy_from_slice(snonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), psk);
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Build the associated data both ends authenticate:
/// `"{conn_b64}|{exp}|{codec}|{w}x{h}|{fps}"`
pub fn build_aad(conn_b64: &str, exp: u64, codec: &str, width: u32, height: u32, fps: u32) -> Vec<u8> {
    format!("{conn_b64}|{exp}|{codec}|{width}x{height}|{fps}").into_bytes()
}

/// Sealing half of a session: encrypts outbound chunks
pub struct FrameSealer {
    cipher: Aes256Gcm,
    conn_id: [u8; CONN_ID_LEN],
    counter: u64,
    aad: Vec<u8>,
}

impl FrameSealer {
    pub fn new(key: &[u8; SESSION_KEY_LEN], conn_id: [u8; CONN_ID_LEN], aad: Vec<u8>) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self {
            cipher,
            conn_id,
            counter: 0,
            aad,
        }
    }

    /// Seal one chunk into a wire record.
    ///
    /// The counter is incremented before use, so the first record carries
    /// counter 1.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        self.counter += 1;
        let nonce_bytes = make_nonce(&self.conn_id, self.counter);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        // RustCrypto appends the tag; the wire wants nonce || tag || ct
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut record = BytesMut::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        record.put_slice(&nonce_bytes);
        record.put_slice(tag);
        record.put_slice(ciphertext);
        Ok(record.freeze())
    }

    /// Counter of the most recently sealed record (0 before the first)
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Opening half of a session: verifies and decrypts inbound records
pub struct FrameOpener {
    cipher: Aes256Gcm,
    conn_id: [u8; CONN_ID_LEN],
    last_accepted: Option<u64>,
    aad: Vec<u8>,
}

impl FrameOpener {
    pub fn new(key: &[u8; SESSION_KEY_LEN], conn_id: [u8; CONN_ID_LEN], aad: Vec<u8>) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self {
            cipher,
            conn_id,
            last_accepted: None,
            aad,
        }
    }

    /// Verify and decrypt one wire record.
    ///
    /// Rejects short records, wrong connection ids, counters not strictly
    /// greater than the last accepted one, and records whose tag does not
    /// authenticate. The counter watermark only advances on success.
    pub fn open(&mut self, record: &[u8]) -> Result<Bytes> {
        if record.len() < MIN_RECORD_LEN {
            return Err(Error::Protocol(format!(
                "record too short: {} bytes",
                record.len()
            )));
        }

        let nonce = &record[..NONCE_LEN];
        if nonce[..CONN_ID_LEN] != self.conn_id {
            return Err(Error::Protocol("nonce connection-id mismatch".into()));
        }

        let counter = u64::from_be_bytes(nonce[CONN_ID_LEN..NONCE_LEN].try_into().unwrap());
        if let Some(last) = self.last_accepted {
            if counter <= last {
                return Err(Error::Protocol(format!(
                    "replayed or reordered counter {counter} (last accepted {last})"
                )));
            }
        }

        let tag = &record[NONCE_LEN..MIN_RECORD_LEN];
        let ciphertext = &record[MIN_RECORD_LEN..];

        // Re-join ct || tag the way the cipher expects
        let mut joined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        joined.extend_from_slice(ciphertext);
        joined.extend_from_slice(tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &joined,
                    aad: &self.aad,
                },
            )
            .map_err(|_| Error::Crypto("authentication failed".into()))?;

        self.last_accepted = Some(counter);
        Ok(Bytes::from(plaintext))
    }

    /// Counter of the most recently accepted record
    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }
}

fn make_nonce(conn_id: &[u8; CONN_ID_LEN], counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..CONN_ID_LEN].copy_from_slice(conn_id);
    nonce[CONN_ID_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}
