//! Worker configuration
//!
//! Three config groups: what the encoder captures (`EncoderConfig`), how the
//! supervisor babysits it (`SupervisorConfig`), and how sessions behave
//! (`ServerConfig`). All have sensible defaults and chainable setters;
//! bounded knobs are clamped in the setters rather than rejected.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Container shape the encoder writes on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Cluster-delimited container (EBML header followed by clusters)
    Cluster,
    /// Box-based container (`ftyp` + `moov` initialization, then fragments)
    Boxed,
}

impl ContainerKind {
    /// Container kind conventionally paired with a codec tag
    pub fn for_codec(codec: &str) -> Self {
        match codec {
            "h264" | "h265" | "hevc" => ContainerKind::Boxed,
            _ => ContainerKind::Cluster,
        }
    }
}

/// Capture parameters for one encoder run
///
/// Immutable snapshot per run; the supervisor re-reads it on restart.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Encoder binary to execute
    pub encoder_bin: PathBuf,

    /// Input device identifier (e.g. `/dev/video0`, or a dshow name)
    pub device: String,

    /// Codec tag, lowercase (advertised to clients in `hello`)
    pub codec: String,

    /// Container the encoder emits
    pub container: ContainerKind,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frames per second
    pub fps: u32,

    /// Extra tuning flags appended verbatim to the argv
    pub extra_args: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            encoder_bin: PathBuf::from("ffmpeg"),
            device: default_device(),
            codec: "vp9".to_string(),
            container: ContainerKind::Cluster,
            width: 1280,
            height: 720,
            fps: 30,
            extra_args: Vec::new(),
        }
    }
}

fn default_device() -> String {
    if cfg!(windows) {
        "Integrated Camera".to_string()
    } else {
        "/dev/video0".to_string()
    }
}

impl EncoderConfig {
    /// Set the capture device
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Set codec tag; also selects the matching container
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into().to_lowercase();
        self.container = ContainerKind::for_codec(&self.codec);
        self
    }

    /// Set frame size
    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set frames per second (clamped to 1..=240)
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.clamp(1, 240);
        self
    }
}

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Size of each stdout read
    pub read_chunk_size: usize,

    /// Delay before respawning after a user-initiated stop
    pub restart_backoff_user: Duration,

    /// Delay before respawning after a crash or natural exit
    pub restart_backoff_crash: Duration,

    /// Budget for graceful encoder termination before the hard kill
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 64 * 1024,
            restart_backoff_user: Duration::from_millis(200),
            restart_backoff_crash: Duration::from_secs(3),
            stop_grace: Duration::from_secs(3),
        }
    }
}

/// Session and listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// How long a session may sit between `hello` and the client's start frame
    pub start_timeout: Duration,

    /// Receive-side inactivity budget while streaming
    pub inactivity_timeout: Duration,

    /// Per-session outbound queue capacity, in chunks
    pub queue_capacity: usize,

    /// Protocol-level keepalive ping interval
    pub keepalive_interval: Duration,

    /// Budget for draining the outbound queue and sending the close frame
    pub close_grace: Duration,
}

/// Bounds shared by the per-subscriber and outbound queues
pub const QUEUE_CAPACITY_MIN: usize = 2;
pub const QUEUE_CAPACITY_MAX: usize = 4096;

const TIMEOUT_MIN: Duration = Duration::from_secs(2);
const TIMEOUT_MAX: Duration = Duration::from_secs(3600);

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            start_timeout: Duration::from_secs(60),
            inactivity_timeout: Duration::from_secs(60),
            queue_capacity: 256,
            keepalive_interval: Duration::from_secs(20),
            close_grace: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the start-frame timeout (clamped to 2 s..=3600 s)
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout.clamp(TIMEOUT_MIN, TIMEOUT_MAX);
        self
    }

    /// Set the streaming inactivity timeout (clamped to 2 s..=3600 s)
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout.clamp(TIMEOUT_MIN, TIMEOUT_MAX);
        self
    }

    /// Set the outbound queue capacity (clamped to 2..=4096)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.clamp(QUEUE_CAPACITY_MIN, QUEUE_CAPACITY_MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoder_config() {
        let config = EncoderConfig::default();
        assert_eq!(config.codec, "vp9");
        assert_eq!(config.container, ContainerKind::Cluster);
        assert_eq!((config.width, config.height, config.fps), (1280, 720, 30));
    }

    #[test]
    fn test_codec_selects_container() {
        let config = EncoderConfig::default().codec("H264");
        assert_eq!(config.codec, "h264");
        assert_eq!(config.container, ContainerKind::Boxed);

        let config = EncoderConfig::default().codec("vp8");
        assert_eq!(config.container, ContainerKind::Cluster);
    }

    #[test]
    fn test_server_config_clamps() {
        let config = ServerConfig::default()
            .start_timeout(Duration::from_millis(10))
            .inactivity_timeout(Duration::from_secs(100_000))
            .queue_capacity(1);

        assert_eq!(config.start_timeout, Duration::from_secs(2));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(3600));
        assert_eq!(config.queue_capacity, QUEUE_CAPACITY_MIN);
    }

    #[test]
    fn test_queue_capacity_upper_clamp() {
        let config = ServerConfig::default().queue_capacity(1 << 20);
        assert_eq!(config.queue_capacity, QUEUE_CAPACITY_MAX);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .start_timeout(Duration::from_secs(5))
            .queue_capacity(64);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.start_timeout, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 64);
    }
}
