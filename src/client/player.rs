//! Protocol-mirror player
//!
//! Connects to a worker's `/stream` endpoint, performs the handshake from
//! the client side, verifies and decrypts every binary record, and feeds
//! the plaintext to a [`MediaSink`]. Alongside the protocol proper it runs
//! the client-side health loop: an application-level ping at half the
//! inactivity window and a receive watchdog that abandons a silent
//! connection.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::crypto::{self, b64, FrameOpener};
use crate::error::{Error, Result};
use crate::keys::KEY_LEN;
use crate::stream::protocol::Hello;

use super::sink::MediaSink;

/// Player connection settings
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/stream`
    pub url: String,

    /// Pre-shared access key (same material as the worker's key file)
    pub access_key: [u8; KEY_LEN],

    /// Lifetime requested for the stream token
    pub token_ttl: Duration,

    /// How long to wait for the upgrade and the `hello` frame
    pub hello_timeout: Duration,

    /// Receive-side inactivity budget; pings go out at half this
    pub inactivity_timeout: Duration,

    /// Retention pass interval for the sink
    pub trim_interval: Duration,

    /// Cap for the reconnect back-off
    pub reconnect_cap: Duration,
}

impl PlayerConfig {
    pub fn new(url: impl Into<String>, access_key: [u8; KEY_LEN]) -> Self {
        Self {
            url: url.into(),
            access_key,
            token_ttl: Duration::from_secs(60),
            hello_timeout: Duration::from_secs(20),
            inactivity_timeout: Duration::from_secs(60),
            trim_interval: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(10),
        }
    }
}

/// Client-side mirror of the streaming protocol
pub struct Player<S: MediaSink> {
    config: PlayerConfig,
    sink: S,
}

impl<S: MediaSink> Player<S> {
    pub fn new(config: PlayerConfig, sink: S) -> Self {
        Self { config, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run one connection to completion.
    ///
    /// Returns `Ok(())` on an orderly close from the server, an error for
    /// anything that should trigger a reconnect.
    pub async fn run_once(&mut self) -> Result<()> {
        let exp = unix_now() + self.config.token_ttl.as_secs();
        let token = crypto::mint_stream_token(&self.config.access_key, exp);
        let mut cnonce = [0u8; crypto::HANDSHAKE_NONCE_LEN];
        OsRng.fill_bytes(&mut cnonce);

        let url = format!(
            "{}?token={}&exp={}&cnonce={}",
            self.config.url,
            b64::to_url_safe(&token),
            exp,
            b64::to_url_safe(&b64::encode(&cnonce)),
        );
        tracing::debug!(url = %self.config.url, exp, "Connecting");

        let (mut ws, _response) =
            tokio::time::timeout(self.config.hello_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| Error::Handshake("connect timeout".into()))?
                .map_err(|e| Error::Handshake(format!("connect failed: {e}")))?;

        // hello: exactly one text frame
        let hello_msg = tokio::time::timeout(self.config.hello_timeout, ws.next())
            .await
            .map_err(|_| Error::Handshake("hello timeout".into()))?
            .ok_or_else(|| Error::Handshake("closed before hello".into()))?
            .map_err(|e| Error::Handshake(format!("hello receive failed: {e}")))?;

        let hello: Hello = match hello_msg {
            Message::Text(text) => serde_json::from_str(&text)
                .map_err(|e| Error::Handshake(format!("malformed hello: {e}")))?,
            other => {
                return Err(Error::Handshake(format!(
                    "expected hello text frame, got {other:?}"
                )))
            }
        };
        if hello.msg_type != Hello::TYPE {
            return Err(Error::Handshake(format!(
                "unexpected message type '{}'",
                hello.msg_type
            )));
        }
        if hello.exp != exp {
            tracing::warn!(ours = exp, server = hello.exp, "Server expiry mismatch");
        }

        let snonce: [u8; crypto::HANDSHAKE_NONCE_LEN] = b64::decode_relaxed(&hello.snonce)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| Error::Handshake("bad snonce in hello".into()))?;
        let conn_id: [u8; crypto::CONN_ID_LEN] = b64::decode_relaxed(&hello.conn)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| Error::Handshake("bad conn id in hello".into()))?;

        let session_key = crypto::derive_session_key(&self.config.access_key, &cnonce, &snonce);
        let aad = crypto::build_aad(
            &hello.conn,
            exp,
            &hello.codec,
            hello.w,
            hello.h,
            hello.fps,
        );
        let mut opener = FrameOpener::new(&session_key, conn_id, aad);

        let start = serde_json::json!({
            "type": "start",
            "conn": hello.conn,
            "exp": hello.exp,
        });
        ws.send(Message::Text(start.to_string()))
            .await
            .map_err(|e| Error::Handshake(format!("start send failed: {e}")))?;
        tracing::debug!(conn = %hello.conn, codec = %hello.codec, "Start sent");

        // Streaming with client-side health loop
        let mut heartbeat = tokio::time::interval(self.config.inactivity_timeout / 2);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.reset();
        let mut retention = tokio::time::interval(self.config.trim_interval);
        retention.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watchdog = tokio::time::interval(Duration::from_secs(1));
        let mut last_rx = Instant::now();
        let mut first_append_pending = true;

        loop {
            tokio::select! {
                maybe = ws.next() => {
                    let msg = match maybe {
                        None => return Err(Error::Protocol("connection lost".into())),
                        Some(Err(e)) => return Err(Error::Protocol(format!("receive failed: {e}"))),
                        Some(Ok(msg)) => msg,
                    };
                    last_rx = Instant::now();

                    match msg {
                        Message::Binary(record) => {
                            if record.len() < crypto::MIN_RECORD_LEN {
                                tracing::warn!(len = record.len(), "Short frame ignored");
                                continue;
                            }
                            match opener.open(&record) {
                                Ok(plain) => {
                                    self.sink.append(plain)?;
                                    if first_append_pending {
                                        first_append_pending = false;
                                        self.sink.on_first_append();
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "Record rejected; closing");
                                    let _ = ws.close(Some(CloseFrame {
                                        code: CloseCode::Policy,
                                        reason: "bad record".into(),
                                    })).await;
                                    return Err(e);
                                }
                            }
                        }
                        Message::Text(text) => {
                            tracing::debug!(%text, "Server text frame");
                        }
                        Message::Close(frame) => {
                            tracing::info!(frame = ?frame, "Server closed");
                            return Ok(());
                        }
                        _ => {} // protocol ping/pong
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = serde_json::json!({"type": "ping", "ts": unix_now()});
                    if ws.send(Message::Text(ping.to_string())).await.is_err() {
                        return Err(Error::Protocol("ping send failed".into()));
                    }
                }
                _ = retention.tick() => {
                    self.sink.trim();
                }
                _ = watchdog.tick() => {
                    if last_rx.elapsed() > self.config.inactivity_timeout {
                        let _ = ws.close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "client watchdog inactivity".into(),
                        })).await;
                        return Err(Error::Protocol("receive inactivity".into()));
                    }
                }
            }
        }
    }

    /// Reconnect-with-back-off driver around [`run_once`], until `stop`
    /// flips to true.
    pub async fn run_with_reconnect(&mut self, mut stop: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);

        loop {
            if *stop.borrow() {
                return;
            }

            match self.run_once().await {
                Ok(()) => backoff = Duration::from_secs(1),
                Err(e) if e.is_canceled() => return,
                Err(e) => tracing::warn!(error = %e, "Stream attempt failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = stop.changed() => return,
            }
            backoff = (backoff * 2).min(self.config.reconnect_cap);
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
