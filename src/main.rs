//! TinyCam worker binary
//!
//! Wires the pieces together: key file, device lock, encoder supervisor,
//! and the WebSocket streaming server, with an orderly ctrl-c shutdown
//! (sessions are told the server is going away, the encoder gets its grace
//! period, then the listener drains).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;

use tinycam::broadcast::Hub;
use tinycam::encoder::{DeviceLock, EncoderSupervisor};
use tinycam::media::InitCache;
use tinycam::server::{self, AppState};
use tinycam::stats::ServerStats;
use tinycam::{EncoderConfig, KeyStore, ServerConfig, SupervisorConfig};

#[derive(Parser, Debug)]
#[command(name = "tinycam")]
#[command(about = "Single-host secure camera streaming worker", long_about = None)]
struct Args {
    /// Listen address for the streaming endpoint
    #[arg(long, env = "TINYCAM_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Path to the key file (generated if absent)
    #[arg(long, env = "TINYCAM_KEYS", default_value = "keys.json")]
    keys: PathBuf,

    /// Capture device identifier
    #[arg(long, env = "TINYCAM_DEVICE")]
    device: Option<String>,

    /// Encoder binary
    #[arg(long, env = "TINYCAM_ENCODER", default_value = "ffmpeg")]
    encoder: PathBuf,

    /// Codec tag (selects the container shape)
    #[arg(long, env = "TINYCAM_CODEC", default_value = "vp9")]
    codec: String,

    /// Frame width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Frame height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Per-session outbound queue capacity, in chunks
    #[arg(long, env = "TINYCAM_QUEUE", default_value_t = 256)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> tinycam::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tinycam=info")),
        )
        .init();

    let args = Args::parse();

    let mut encoder_cfg = EncoderConfig::default()
        .codec(&args.codec)
        .frame_size(args.width, args.height)
        .fps(args.fps);
    encoder_cfg.encoder_bin = args.encoder;
    if let Some(device) = args.device {
        encoder_cfg.device = device;
    }

    // Only one worker per device, enforced before touching anything else
    let _device_lock = DeviceLock::acquire(&encoder_cfg.device)?;

    let keys = KeyStore::load_or_generate(&args.keys)?;

    let init_cache = Arc::new(InitCache::new(encoder_cfg.container));
    let hub = Arc::new(Hub::new());
    let supervisor = Arc::new(EncoderSupervisor::new(
        encoder_cfg,
        SupervisorConfig::default(),
        Arc::clone(&init_cache),
        Arc::clone(&hub),
    ));
    supervisor.start().await;

    let server_cfg = ServerConfig::default()
        .bind(args.bind)
        .queue_capacity(args.queue_capacity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        hub,
        init_cache,
        supervisor: Arc::clone(&supervisor),
        keys: RwLock::new(keys),
        config: server_cfg.clone(),
        stats: Arc::new(ServerStats::new()),
        shutdown: shutdown_rx,
    });

    let listener = server::bind(&server_cfg).await?;
    let mut drain_rx = shutdown_tx.subscribe();
    let server_task = tokio::spawn(server::serve(state, listener, async move {
        let _ = drain_rx.changed().await;
    }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Sessions first (close 1013), then the encoder, then the listener
    let _ = shutdown_tx.send(true);
    supervisor.stop().await;

    match tokio::time::timeout(Duration::from_secs(5), server_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => tracing::error!(error = %e, "Server task panicked"),
        Err(_) => tracing::warn!("Server drain timed out"),
    }

    tracing::info!("Bye");
    Ok(())
}
