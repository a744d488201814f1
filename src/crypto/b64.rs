//! Base64 helpers
//!
//! Values we emit are standard-alphabet with padding. Values we accept may
//! arrive URL-safe (the token travels in a query string), unpadded, or with
//! stray whitespace, so decoding normalizes before handing to the engine.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode with the standard alphabet and padding
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Re-express a standard-alphabet value as URL-safe without padding, for
/// values that travel in a query string
pub fn to_url_safe(encoded: &str) -> String {
    encoded
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect()
}

/// Decode accepting either alphabet and missing padding
pub fn decode_relaxed(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let mut normalized: String = input
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();

    let rem = normalized.len() % 4;
    if rem != 0 {
        normalized.extend(std::iter::repeat('=').take(4 - rem));
    }

    STANDARD.decode(normalized)
}
