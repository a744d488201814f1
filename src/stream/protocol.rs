//! Streaming wire protocol
//!
//! Exactly one `hello` text frame from the server, exactly one start-shaped
//! text frame from the client, then binary AEAD records. The query-string
//! credentials are checked before the WebSocket upgrade completes.

use serde::{Deserialize, Serialize};

/// Close codes used on the streaming socket
pub mod close {
    /// Orderly teardown
    pub const NORMAL: u16 = 1000;
    /// Inactivity or handshake timeout
    pub const GOING_AWAY: u16 = 1001;
    /// Client cannot play the advertised codec
    pub const UNSUPPORTED: u16 = 1003;
    /// Handshake mismatch
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected server-side failure
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Worker is shutting down
    pub const SHUTTING_DOWN: u16 = 1013;
}

/// Query parameters presented on `GET /stream`.
///
/// All optional so their absence maps to an auth failure (401) rather than
/// a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Base64 `HMAC-SHA256(access_key, "stream:" + exp)`
    pub token: Option<String>,
    /// Decimal unix seconds the token covers
    pub exp: Option<String>,
    /// Base64 of the client's 16 handshake-nonce bytes
    pub cnonce: Option<String>,
}

/// Server → client greeting, sent once right after the upgrade
#[derive(Debug, Serialize, Deserialize)]
pub struct Hello {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Base64 of the server's 16 handshake-nonce bytes
    pub snonce: String,
    /// Base64 of the 4-byte connection id
    pub conn: String,
    pub w: u32,
    pub h: u32,
    pub fps: u32,
    pub codec: String,
    pub exp: u64,
}

impl Hello {
    pub const TYPE: &'static str = "hello";
}

/// Client → server start frame (one text frame within the start timeout)
#[derive(Debug, Serialize, Deserialize)]
pub struct StartFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Must echo `hello.conn` when present
    #[serde(default)]
    pub conn: Option<String>,
    /// Must echo `hello.exp` when present
    #[serde(default)]
    pub exp: Option<u64>,
}

impl StartFrame {
    /// Accepted `type` values (`request`/`ready` kept for compatibility)
    pub fn is_start_type(msg_type: &str) -> bool {
        matches!(msg_type, "start" | "request" | "ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_wire_shape() {
        let hello = Hello {
            msg_type: Hello::TYPE.to_string(),
            snonce: "c25vbmNl".into(),
            conn: "Y29ubg==".into(),
            w: 1280,
            h: 720,
            fps: 30,
            codec: "vp9".into(),
            exp: 1_700_000_000,
        };

        let json = serde_json::to_string(&hello).unwrap();
        assert!(json.contains(r#""type":"hello""#));
        assert!(json.contains(r#""w":1280"#));
        assert!(json.contains(r#""exp":1700000000"#));
    }

    #[test]
    fn test_start_frame_minimal() {
        let start: StartFrame = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        assert!(StartFrame::is_start_type(&start.msg_type));
        assert!(start.conn.is_none());
        assert!(start.exp.is_none());
    }

    #[test]
    fn test_start_frame_full() {
        let start: StartFrame =
            serde_json::from_str(r#"{"type":"ready","conn":"AAAA","exp":123}"#).unwrap();
        assert!(StartFrame::is_start_type(&start.msg_type));
        assert_eq!(start.conn.as_deref(), Some("AAAA"));
        assert_eq!(start.exp, Some(123));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(!StartFrame::is_start_type("hello"));
        assert!(!StartFrame::is_start_type("ping"));
        assert!(!StartFrame::is_start_type(""));
    }
}
