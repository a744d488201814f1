//! End-to-end streaming scenarios
//!
//! Runs the real axum endpoint on loopback and drives it with a raw
//! WebSocket client (and the Player mirror), covering the handshake, the
//! preroll-then-live ordering, auth rejections, the start timeout, and
//! replay rejection on captured wire records.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use tinycam::broadcast::Hub;
use tinycam::client::{BufferSink, MediaSink, Player, PlayerConfig, Retention};
use tinycam::crypto::{self, b64, FrameOpener};
use tinycam::encoder::EncoderSupervisor;
use tinycam::media::InitCache;
use tinycam::server::{self, AppState};
use tinycam::stats::ServerStats;
use tinycam::stream::Hello;
use tinycam::{ContainerKind, EncoderConfig, KeyStore, ServerConfig, SupervisorConfig};

struct TestWorker {
    addr: SocketAddr,
    hub: Arc<Hub>,
    init_cache: Arc<InitCache>,
    access_key: [u8; 32],
    shutdown_tx: watch::Sender<bool>,
    _keys_dir: tempfile::TempDir,
}

impl TestWorker {
    async fn spawn(config: ServerConfig) -> Self {
        let keys_dir = tempfile::tempdir().expect("tempdir");
        let keys = KeyStore::load_or_generate(keys_dir.path().join("keys.json")).expect("keys");
        let access_key = *keys.access_key();

        let init_cache = Arc::new(InitCache::new(ContainerKind::Cluster));
        let hub = Arc::new(Hub::new());
        // Never started: sessions only read its config for the hello frame
        let supervisor = Arc::new(EncoderSupervisor::new(
            EncoderConfig::default(),
            SupervisorConfig::default(),
            Arc::clone(&init_cache),
            Arc::clone(&hub),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(AppState {
            hub: Arc::clone(&hub),
            init_cache: Arc::clone(&init_cache),
            supervisor,
            keys: RwLock::new(keys),
            config: config.clone(),
            stats: Arc::new(ServerStats::new()),
            shutdown: shutdown_rx,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let mut drain_rx = shutdown_tx.subscribe();
        tokio::spawn(server::serve(state, listener, async move {
            let _ = drain_rx.changed().await;
        }));

        Self {
            addr,
            hub,
            init_cache,
            access_key,
            shutdown_tx,
            _keys_dir: keys_dir,
        }
    }

    fn stream_url(&self, token: &str, exp: u64, cnonce_b64: &str) -> String {
        format!(
            "ws://{}/stream?token={}&exp={}&cnonce={}",
            self.addr,
            b64::to_url_safe(token),
            exp,
            b64::to_url_safe(cnonce_b64),
        )
    }

    fn valid_url(&self, exp: u64, cnonce: &[u8; 16]) -> String {
        let token = crypto::mint_stream_token(&self.access_key, exp);
        self.stream_url(&token, exp, &b64::encode(cnonce))
    }

    async fn wait_for_subscriber(&self) {
        for _ in 0..250 {
            if self.hub.subscriber_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no subscriber attached in time");
    }
}

/// Cluster head whose init segment is the 6 bytes before the first cluster
/// marker (document signature + two header bytes).
fn feed_cluster_init(cache: &InitCache) -> Vec<u8> {
    let head = vec![
        0x1A, 0x45, 0xDF, 0xA3, 0xAA, 0xBB, 0x1F, 0x43, 0xB6, 0x75,
    ];
    cache.feed(&head);
    head[..6].to_vec()
}

fn random_cnonce() -> [u8; 16] {
    let mut cnonce = [0u8; 16];
    OsRng.fill_bytes(&mut cnonce);
    cnonce
}

async fn recv_text(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, WsError>> + Unpin),
) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("receive timeout")
            .expect("stream ended")
            .expect("receive failed");
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

async fn recv_binary(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, WsError>> + Unpin),
) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("receive timeout")
            .expect("stream ended")
            .expect("receive failed");
        match msg {
            Message::Binary(data) => return data,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn s1_successful_handshake_preroll_then_first_frame() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;
    let init_bytes = feed_cluster_init(&worker.init_cache);

    let exp = server::unix_now() + 60;
    let cnonce = random_cnonce();
    let (mut ws, _) = connect_async(worker.valid_url(exp, &cnonce))
        .await
        .expect("upgrade");

    // hello
    let hello: Hello = serde_json::from_str(&recv_text(&mut ws).await).expect("hello json");
    assert_eq!(hello.msg_type, "hello");
    assert_eq!(hello.exp, exp);
    assert_eq!(hello.codec, "vp9");
    let snonce: [u8; 16] = b64::decode_relaxed(&hello.snonce)
        .unwrap()
        .try_into()
        .expect("snonce is 16 bytes");
    let conn_id: [u8; 4] = b64::decode_relaxed(&hello.conn)
        .unwrap()
        .try_into()
        .expect("conn id is 4 bytes");

    // start
    let start = serde_json::json!({"type": "start", "conn": hello.conn, "exp": hello.exp});
    ws.send(Message::Text(start.to_string())).await.expect("start send");

    // Mirror the derivation
    let key = crypto::derive_session_key(&worker.access_key, &cnonce, &snonce);
    let aad = crypto::build_aad(&hello.conn, exp, &hello.codec, hello.w, hello.h, hello.fps);
    let mut opener = FrameOpener::new(&key, conn_id, aad);

    // Preroll record comes first and carries counter 1
    let preroll = recv_binary(&mut ws).await;
    assert_eq!(&preroll[..4], &conn_id);
    assert_eq!(u64::from_be_bytes(preroll[4..12].try_into().unwrap()), 1);
    assert_eq!(&opener.open(&preroll).unwrap()[..], &init_bytes[..]);

    // Then the live chunk
    worker.wait_for_subscriber().await;
    worker.hub.broadcast(Bytes::from_static(b"live-chunk"));

    let live = recv_binary(&mut ws).await;
    assert_eq!(&live[..4], &conn_id);
    assert_eq!(u64::from_be_bytes(live[4..12].try_into().unwrap()), 2);
    assert_eq!(&opener.open(&live).unwrap()[..], b"live-chunk");
}

#[tokio::test]
async fn s2_expired_token_rejected_before_upgrade() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;

    let exp = server::unix_now() - 1;
    let err = connect_async(worker.valid_url(exp, &random_cnonce()))
        .await
        .expect_err("expired token must not upgrade");

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_short_cnonce_rejected_before_upgrade() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;

    let exp = server::unix_now() + 60;
    let token = crypto::mint_stream_token(&worker.access_key, exp);
    let url = worker.stream_url(&token, exp, &b64::encode(&[1u8; 15]));

    let err = connect_async(url).await.expect_err("short cnonce must not upgrade");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
}

#[tokio::test]
async fn s4_missing_start_closes_with_policy_violation() {
    let config = ServerConfig::default().start_timeout(Duration::from_secs(2));
    let worker = TestWorker::spawn(config).await;

    let exp = server::unix_now() + 60;
    let (mut ws, _) = connect_async(worker.valid_url(exp, &random_cnonce()))
        .await
        .expect("upgrade");

    let _hello = recv_text(&mut ws).await;

    // Send nothing; the server must give up with 1008
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("no close before timeout")
            .expect("stream ended without close frame")
            .expect("receive failed");
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                break;
            }
            Message::Close(None) => panic!("close frame carried no code"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn s5_replayed_record_rejected_by_receiver() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;

    let exp = server::unix_now() + 60;
    let cnonce = random_cnonce();
    let (mut ws, _) = connect_async(worker.valid_url(exp, &cnonce))
        .await
        .expect("upgrade");

    let hello: Hello = serde_json::from_str(&recv_text(&mut ws).await).unwrap();
    let snonce: [u8; 16] = b64::decode_relaxed(&hello.snonce).unwrap().try_into().unwrap();
    let conn_id: [u8; 4] = b64::decode_relaxed(&hello.conn).unwrap().try_into().unwrap();
    let start = serde_json::json!({"type": "start", "conn": hello.conn, "exp": hello.exp});
    ws.send(Message::Text(start.to_string())).await.unwrap();

    worker.wait_for_subscriber().await;
    worker.hub.broadcast(Bytes::from_static(b"one-of-a-kind"));
    let record = recv_binary(&mut ws).await;

    let key = crypto::derive_session_key(&worker.access_key, &cnonce, &snonce);
    let aad = crypto::build_aad(&hello.conn, exp, &hello.codec, hello.w, hello.h, hello.fps);
    let mut opener = FrameOpener::new(&key, conn_id, aad);

    // First copy accepted, identical second copy rejected
    assert!(opener.open(&record).is_ok());
    assert!(opener.open(&record).is_err());
}

#[tokio::test]
async fn start_with_wrong_conn_id_closes_with_policy_violation() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;

    let exp = server::unix_now() + 60;
    let (mut ws, _) = connect_async(worker.valid_url(exp, &random_cnonce()))
        .await
        .expect("upgrade");

    let _hello = recv_text(&mut ws).await;
    let start = serde_json::json!({"type": "start", "conn": "AAAAAA==", "exp": exp});
    ws.send(Message::Text(start.to_string())).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("no close in time")
            .expect("stream ended without close frame")
            .expect("receive failed");
        if let Message::Close(Some(frame)) = msg {
            assert_eq!(frame.code, CloseCode::Policy);
            break;
        }
    }
}

#[tokio::test]
async fn player_streams_preroll_and_live_until_shutdown() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;
    let init_bytes = feed_cluster_init(&worker.init_cache);

    let player_config = PlayerConfig::new(
        format!("ws://{}/stream", worker.addr),
        worker.access_key,
    );
    let mut player = Player::new(player_config, BufferSink::new(Retention::Grow));

    let handle = tokio::spawn(async move {
        let result = player.run_once().await;
        (player, result)
    });

    worker.wait_for_subscriber().await;
    worker.hub.broadcast(Bytes::from_static(b"chunk-a"));
    worker.hub.broadcast(Bytes::from_static(b"chunk-b"));

    // Let the writer drain, then tell sessions the worker is going away
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = worker.shutdown_tx.send(true);

    let (player, result) = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("player did not finish")
        .expect("player task panicked");

    // Orderly server close → clean return
    result.expect("player should end cleanly on server shutdown");

    let mut expected = init_bytes;
    expected.extend_from_slice(b"chunk-a");
    expected.extend_from_slice(b"chunk-b");
    assert_eq!(player.sink().contents(), expected);
    assert_eq!(player.sink().appends(), 3);
}

#[tokio::test]
async fn token_minted_under_wrong_key_rejected() {
    let worker = TestWorker::spawn(ServerConfig::default()).await;

    // Token minted under a key that is not the worker's
    let stale_key = [0x55u8; 32];
    let exp = server::unix_now() + 60;
    let token = crypto::mint_stream_token(&stale_key, exp);
    let url = worker.stream_url(&token, exp, &b64::encode(&random_cnonce()));

    let err = connect_async(url).await.expect_err("stale key must fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
}

// Sanity: BufferSink window retention is driven by the player's trim tick;
// exercised here without a server.
#[tokio::test]
async fn window_sink_trims_when_driven() {
    let mut sink = BufferSink::new(Retention::Window(Duration::from_millis(10)));
    sink.append(Bytes::from_static(b"stale")).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    sink.trim();
    assert_eq!(sink.byte_len(), 0);
}
