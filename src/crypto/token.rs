//! Stream access tokens
//!
//! A client proves knowledge of the access key before the WebSocket upgrade
//! by presenting `token = base64(HMAC-SHA256(access_key, "stream:" + exp))`
//! alongside the decimal `exp` it signed. Verification recomputes the MAC
//! and compares in constant time via [`Mac::verify_slice`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::b64;

type HmacSha256 = Hmac<Sha256>;

/// Compute the token a client sends for the given expiry
pub fn mint_stream_token(access_key: &[u8], exp: u64) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(access_key)
        .expect("HMAC accepts any key length");
    mac.update(format!("stream:{exp}").as_bytes());
    b64::encode(&mac.finalize().into_bytes())
}

/// Verify a presented token against the access key and expiry
pub fn verify_stream_token(access_key: &[u8], exp: u64, token: &str) -> bool {
    let Ok(presented) = b64::decode_relaxed(token) else {
        return false;
    };
    let mut mac = <HmacSha256 as Mac>::new_from_slice(access_key)
        .expect("HMAC accepts any key length");
    mac.update(format!("stream:{exp}").as_bytes());
    mac.verify_slice(&presented).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_verify_round_trip() {
        let key = [7u8; 32];
        let token = mint_stream_token(&key, 1_700_000_000);
        assert!(verify_stream_token(&key, 1_700_000_000, &token));
    }

    #[test]
    fn test_wrong_exp_rejected() {
        let key = [7u8; 32];
        let token = mint_stream_token(&key, 1_700_000_000);
        assert!(!verify_stream_token(&key, 1_700_000_001, &token));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = mint_stream_token(&[7u8; 32], 1_700_000_000);
        assert!(!verify_stream_token(&[8u8; 32], 1_700_000_000, &token));
    }

    #[test]
    fn test_url_safe_token_accepted() {
        let key = [9u8; 32];
        let token = mint_stream_token(&key, 42)
            .replace('+', "-")
            .replace('/', "_")
            .replace('=', "");
        assert!(verify_stream_token(&key, 42, &token));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(!verify_stream_token(&[0u8; 32], 42, "!!not-base64!!"));
    }
}
