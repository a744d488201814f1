//! Streaming crypto
//!
//! Everything a session needs to turn encoder chunks into authenticated
//! wire records: tolerant base64 transport encoding, the pre-upgrade stream
//! token, and the per-connection key derivation + AEAD framing.

pub mod b64;
pub mod session;
pub mod token;

pub use session::{
    build_aad, derive_session_key, FrameOpener, FrameSealer, CONN_ID_LEN, HANDSHAKE_NONCE_LEN,
    HKDF_INFO, MIN_RECORD_LEN, NONCE_LEN, SESSION_KEY_LEN, TAG_LEN,
};
pub use token::{mint_stream_token, verify_stream_token};
