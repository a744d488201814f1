//! WebSocket streaming session
//!
//! Life of a session:
//!
//! ```text
//! PreAccept ──401──> rejected before upgrade
//!     │ token/exp/cnonce valid
//!     ▼
//! Accepted   derive key, pick conn id, send `hello`
//!     ▼
//! AwaitStart one start-shaped text frame, else close 1008
//!     ▼
//! Streaming  preroll init slices, then live chunks; writer task drains
//!     │      the outbound queue, receiver enforces the inactivity watchdog
//!     ▼
//! Closing    unsubscribe, drain, polite close frame, abort on overrun
//! ```
//!
//! One writer task per session is the only consumer of the outbound queue;
//! producers are the preroll loop and the broadcast hub. The queue is
//! bounded drop-oldest, so a slow client sees gaps, never growing latency.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::broadcast::{ChunkQueue, Hub};
use crate::config::{EncoderConfig, ServerConfig};
use crate::crypto::{self, b64, FrameSealer};
use crate::error::{Error, Result};
use crate::keys::KEY_LEN;
use crate::media::InitCache;
use crate::stats::{ServerStats, SessionStats};
use crate::stream::protocol::{close, Hello, StartFrame, StreamQuery};

/// Init-snapshot slice size for preroll records
const PREROLL_SLICE: usize = 64 * 1024;

/// Credentials that survived the pre-upgrade check.
///
/// Holds a copy of the access key taken at accept time, so a key rotation
/// mid-handshake cannot change what this session derives from.
pub struct AuthedStream {
    pub exp: u64,
    pub cnonce: [u8; crypto::HANDSHAKE_NONCE_LEN],
    pub psk: [u8; KEY_LEN],
}

/// Everything a session borrows from the worker
#[derive(Clone)]
pub struct SessionContext {
    pub hub: Arc<Hub>,
    pub init_cache: Arc<InitCache>,
    pub encoder: EncoderConfig,
    pub config: ServerConfig,
    pub stats: Arc<ServerStats>,
    pub shutdown: watch::Receiver<bool>,
}

/// Validate the query-string credentials before the upgrade.
///
/// Token first (constant-time), then expiry, then the nonce shape; any
/// failure maps to HTTP 401 with no `hello` ever sent.
pub fn authorize(query: &StreamQuery, access_key: &[u8; KEY_LEN], now: u64) -> Result<AuthedStream> {
    let token = query.token.as_deref().ok_or(Error::Auth("missing token"))?;
    let exp_raw = query.exp.as_deref().ok_or(Error::Auth("missing exp"))?;
    let cnonce_raw = query.cnonce.as_deref().ok_or(Error::Auth("missing cnonce"))?;

    let exp: u64 = exp_raw.parse().map_err(|_| Error::Auth("malformed exp"))?;

    if !crypto::verify_stream_token(access_key, exp, token) {
        return Err(Error::Auth("invalid token"));
    }
    if exp < now {
        return Err(Error::Auth("expired token"));
    }

    let cnonce_bytes =
        b64::decode_relaxed(cnonce_raw).map_err(|_| Error::Auth("malformed cnonce"))?;
    let cnonce: [u8; crypto::HANDSHAKE_NONCE_LEN] = cnonce_bytes
        .try_into()
        .map_err(|_| Error::Auth("cnonce must decode to 16 bytes"))?;

    Ok(AuthedStream {
        exp,
        cnonce,
        psk: *access_key,
    })
}

/// Why the session left the streaming phase
enum CloseDecision {
    /// Peer sent a close frame or the stream source ended
    Normal,
    /// No inbound activity within the configured window
    Inactivity,
    /// Worker shutdown
    ShuttingDown,
    /// Writer hit an unexpected internal failure
    Internal,
    /// Socket already gone; nothing left to say
    Gone,
}

/// Drive one accepted WebSocket through the full session state machine.
pub async fn run(socket: WebSocket, ctx: SessionContext, authed: AuthedStream) {
    let session_id = ctx.stats.sessions_total.fetch_add(1, Ordering::Relaxed) + 1;
    ctx.stats.sessions_active.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(session_id, "Session accepted");

    drive(socket, &ctx, authed, session_id).await;

    ctx.stats.sessions_active.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(session_id, "Session closed");
}

async fn drive(mut socket: WebSocket, ctx: &SessionContext, authed: AuthedStream, session_id: u64) {
    // Accepted: derive the session crypto and greet
    let mut snonce = [0u8; crypto::HANDSHAKE_NONCE_LEN];
    OsRng.fill_bytes(&mut snonce);
    let mut conn_id = [0u8; crypto::CONN_ID_LEN];
    OsRng.fill_bytes(&mut conn_id);
    let conn_b64 = b64::encode(&conn_id);

    let session_key = crypto::derive_session_key(&authed.psk, &authed.cnonce, &snonce);
    let enc = &ctx.encoder;
    let aad = crypto::build_aad(
        &conn_b64,
        authed.exp,
        &enc.codec,
        enc.width,
        enc.height,
        enc.fps,
    );

    let hello = Hello {
        msg_type: Hello::TYPE.to_string(),
        snonce: b64::encode(&snonce),
        conn: conn_b64.clone(),
        w: enc.width,
        h: enc.height,
        fps: enc.fps,
        codec: enc.codec.clone(),
        exp: authed.exp,
    };
    let hello_json = match serde_json::to_string(&hello) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(session_id, error = %e, "Hello serialization failed");
            send_close(&mut socket, close::INTERNAL_ERROR, "internal error").await;
            return;
        }
    };
    if socket.send(Message::Text(hello_json)).await.is_err() {
        return;
    }

    // AwaitStart
    match await_start(&mut socket, ctx.config.start_timeout, &conn_b64, authed.exp).await {
        StartOutcome::Accepted => {}
        StartOutcome::Rejected(reason) => {
            tracing::debug!(session_id, reason, "Handshake rejected");
            send_close(&mut socket, close::POLICY_VIOLATION, reason).await;
            return;
        }
        StartOutcome::Gone => return,
    }
    tracing::debug!(session_id, conn = %conn_b64, "Streaming");

    // Streaming: preroll the init snapshot ahead of any live chunk, then
    // attach to the hub with the same queue.
    let queue = ChunkQueue::new(ctx.config.queue_capacity);
    let slices = preroll_slices(&ctx.init_cache.snapshot());
    let preroll_count = slices.len() as u64;
    for slice in slices {
        queue.push(slice);
    }
    let subscriber_id = ctx.hub.subscribe(queue.clone());

    let sealer = FrameSealer::new(&session_key, conn_id, aad);
    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(writer_task(
        ws_tx,
        queue.clone(),
        sealer,
        ctx.config.keepalive_interval,
        preroll_count,
    ));

    let (decision, writer_done) =
        receive_loop(ws_rx, &mut writer, ctx.config.inactivity_timeout, ctx.shutdown.clone())
            .await;

    // Closing
    ctx.hub.unsubscribe(subscriber_id);
    queue.close();

    let writer_done = match writer_done {
        Some(done) => Some(done),
        None => match tokio::time::timeout(ctx.config.close_grace, &mut writer).await {
            Ok(Ok(done)) => Some(done),
            Ok(Err(_)) => None,
            Err(_) => {
                writer.abort();
                None
            }
        },
    };

    let mut sink = None;
    if let Some(done) = writer_done {
        if done.stats.dropped_chunks > 0 {
            tracing::debug!(
                session_id,
                dropped = done.stats.dropped_chunks,
                "Backpressure drops on outbound queue"
            );
        }
        ctx.stats.absorb_session(&done.stats);
        tracing::info!(
            session_id,
            frames = done.stats.frames_sent,
            bytes = done.stats.bytes_sent,
            preroll = done.stats.preroll_frames,
            "Session streaming finished"
        );
        sink = done.sink;
    }

    if let Some(mut sink) = sink {
        let (code, reason) = match decision {
            CloseDecision::Normal => (close::NORMAL, "bye"),
            CloseDecision::Inactivity => (close::GOING_AWAY, "inactivity"),
            CloseDecision::ShuttingDown => (close::SHUTTING_DOWN, "server shutting down"),
            CloseDecision::Internal => (close::INTERNAL_ERROR, "internal error"),
            CloseDecision::Gone => return,
        };
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }));
        let _ = tokio::time::timeout(ctx.config.close_grace, sink.send(frame)).await;
    }
}

enum StartOutcome {
    Accepted,
    Rejected(&'static str),
    Gone,
}

async fn await_start(
    socket: &mut WebSocket,
    start_timeout: Duration,
    conn_b64: &str,
    exp: u64,
) -> StartOutcome {
    let deadline = Instant::now() + start_timeout;

    loop {
        let msg = match tokio::time::timeout_at(deadline, socket.recv()).await {
            Err(_) => return StartOutcome::Rejected("start timeout"),
            Ok(None) | Ok(Some(Err(_))) => return StartOutcome::Gone,
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<StartFrame>(&text) else {
                    return StartOutcome::Rejected("malformed start frame");
                };
                if !StartFrame::is_start_type(&frame.msg_type) {
                    return StartOutcome::Rejected("unexpected message type");
                }
                if frame.conn.as_deref().is_some_and(|conn| conn != conn_b64) {
                    return StartOutcome::Rejected("connection id mismatch");
                }
                if frame.exp.is_some_and(|e| e != exp) {
                    return StartOutcome::Rejected("expiry mismatch");
                }
                return StartOutcome::Accepted;
            }
            Message::Binary(_) => return StartOutcome::Rejected("binary frame before start"),
            Message::Close(_) => return StartOutcome::Gone,
            // Protocol-level ping/pong while we wait
            _ => {}
        }
    }
}

/// Result of the writer task: the sink (if the socket is still usable) and
/// the session counters it accumulated.
struct WriterDone {
    sink: Option<SplitSink<WebSocket, Message>>,
    stats: SessionStats,
    internal_error: bool,
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    queue: ChunkQueue,
    mut sealer: FrameSealer,
    keepalive_interval: Duration,
    preroll_count: u64,
) -> WriterDone {
    let mut stats = SessionStats::default();
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + keepalive_interval,
        keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe = queue.pop() => match maybe {
                Some(chunk) => {
                    let record = match sealer.seal(&chunk) {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::error!(error = %e, "Frame sealing failed");
                            stats.dropped_chunks = queue.dropped();
                            return WriterDone { sink: Some(sink), stats, internal_error: true };
                        }
                    };
                    let len = record.len() as u64;
                    if sink.send(Message::Binary(record.to_vec())).await.is_err() {
                        stats.dropped_chunks = queue.dropped();
                        return WriterDone { sink: None, stats, internal_error: false };
                    }
                    stats.frames_sent += 1;
                    stats.bytes_sent += len;
                    if stats.frames_sent <= preroll_count {
                        stats.preroll_frames += 1;
                    }
                }
                None => {
                    stats.dropped_chunks = queue.dropped();
                    return WriterDone { sink: Some(sink), stats, internal_error: false };
                }
            },
            _ = keepalive.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    stats.dropped_chunks = queue.dropped();
                    return WriterDone { sink: None, stats, internal_error: false };
                }
            }
        }
    }
}

/// Receive side of the streaming phase: watches for peer frames, the
/// inactivity deadline, worker shutdown, and writer completion.
async fn receive_loop(
    mut ws_rx: SplitStream<WebSocket>,
    writer: &mut JoinHandle<WriterDone>,
    inactivity: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (CloseDecision, Option<WriterDone>) {
    let mut deadline = Instant::now() + inactivity;

    if *shutdown.borrow() {
        return (CloseDecision::ShuttingDown, None);
    }

    loop {
        tokio::select! {
            joined = &mut *writer => {
                let done = joined.ok();
                let decision = match &done {
                    Some(d) if d.internal_error => CloseDecision::Internal,
                    _ => CloseDecision::Normal,
                };
                return (decision, done);
            }
            maybe = ws_rx.next() => match maybe {
                None | Some(Err(_)) => return (CloseDecision::Gone, None),
                Some(Ok(Message::Close(_))) => return (CloseDecision::Normal, None),
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    deadline = Instant::now() + inactivity;
                }
                Some(Ok(_)) => {} // protocol ping/pong
            },
            _ = tokio::time::sleep_until(deadline) => return (CloseDecision::Inactivity, None),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return (CloseDecision::ShuttingDown, None);
                }
            }
        }
    }
}

async fn send_close(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    let _ = socket.send(frame).await;
}

/// Split an init snapshot into preroll-sized pieces; each becomes one
/// encrypted record ahead of the first live chunk.
fn preroll_slices(snapshot: &Bytes) -> Vec<Bytes> {
    let mut slices = Vec::new();
    let mut offset = 0;
    while offset < snapshot.len() {
        let end = (offset + PREROLL_SLICE).min(snapshot.len());
        slices.push(snapshot.slice(offset..end));
        offset = end;
    }
    slices
}
