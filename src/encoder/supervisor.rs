//! Encoder supervision
//!
//! Owns the single encoder child for a device and keeps it running: reset
//! the init cache, spawn, pump stdout into the cache and the fan-out hub,
//! and respawn after a back-off when the process exits. `start`/`stop` are
//! idempotent and serialized by the runtime lock; stopping terminates the
//! encoder gracefully, then forcefully, and awaits the read task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::Hub;
use crate::config::{EncoderConfig, SupervisorConfig};
use crate::media::InitCache;

use super::{args, guardian};

/// Supervises the encoder child process and its read loop
pub struct EncoderSupervisor {
    encoder_cfg: std::sync::Mutex<EncoderConfig>,
    sup_cfg: SupervisorConfig,
    init_cache: Arc<InitCache>,
    hub: Arc<Hub>,
    runtime: tokio::sync::Mutex<Runtime>,
    /// Pid of the live child; 0 while none is running
    pid: AtomicU32,
}

#[derive(Default)]
struct Runtime {
    read_task: Option<JoinHandle<()>>,
    cancel: Option<watch::Sender<bool>>,
    last_stop_was_user: bool,
}

enum ReadOutcome {
    Canceled,
    Eof,
    Failed,
}

impl EncoderSupervisor {
    pub fn new(
        encoder_cfg: EncoderConfig,
        sup_cfg: SupervisorConfig,
        init_cache: Arc<InitCache>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            encoder_cfg: std::sync::Mutex::new(encoder_cfg),
            sup_cfg,
            init_cache,
            hub,
            runtime: tokio::sync::Mutex::new(Runtime::default()),
            pid: AtomicU32::new(0),
        }
    }

    /// Pid of the currently running encoder, if any
    pub fn current_pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Snapshot of the config the next run will use
    pub fn current_config(&self) -> EncoderConfig {
        self.encoder_cfg.lock().expect("encoder config lock poisoned").clone()
    }

    /// Replace the config; takes effect on the next (re)start
    pub fn set_config(&self, cfg: EncoderConfig) {
        *self.encoder_cfg.lock().expect("encoder config lock poisoned") = cfg;
    }

    /// Start the supervision loop. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut runtime = self.runtime.lock().await;
        if runtime
            .read_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let initial_delay = if runtime.last_stop_was_user {
            self.sup_cfg.restart_backoff_user
        } else {
            Duration::ZERO
        };
        runtime.last_stop_was_user = false;

        let this = Arc::clone(self);
        runtime.read_task = Some(tokio::spawn(async move {
            this.run_loop(cancel_rx, initial_delay).await;
        }));
        runtime.cancel = Some(cancel_tx);
    }

    /// Stop the encoder and the supervision loop. No-op if not running.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        if let Some(cancel) = runtime.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(task) = runtime.read_task.take() {
            let _ = task.await;
        }
        runtime.last_stop_was_user = true;
    }

    /// Stop then start with the current config
    pub async fn restart(self: &Arc<Self>) {
        self.stop().await;
        self.start().await;
    }

    async fn run_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>, initial_delay: Duration) {
        if initial_delay > Duration::ZERO
            && !sleep_cancellable(initial_delay, &mut cancel).await
        {
            return;
        }

        loop {
            if *cancel.borrow() {
                break;
            }

            let cfg = self.current_config();
            self.init_cache.reset(cfg.container);

            let argv = args::build_argv(&cfg);
            let mut child = match guardian::spawn(&argv) {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(error = %e, bin = %cfg.encoder_bin.display(), "Encoder spawn failed");
                    if !sleep_cancellable(self.sup_cfg.restart_backoff_crash, &mut cancel).await {
                        break;
                    }
                    continue;
                }
            };

            let pid = child.id().unwrap_or(0);
            self.pid.store(pid, Ordering::Release);
            tracing::info!(pid, device = %cfg.device, codec = %cfg.codec, "Encoder started");

            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::debug!(pid, "encoder: {line}");
                    }
                });
            }

            let outcome = match child.stdout.take() {
                Some(stdout) => self.pump_stdout(stdout, &mut cancel).await,
                None => ReadOutcome::Failed,
            };

            match outcome {
                ReadOutcome::Canceled => {
                    let grace = self.sup_cfg.stop_grace;
                    if guardian::terminate_graceful(&mut child, grace).await {
                        tracing::info!(pid, "Encoder stopped gracefully");
                    } else if guardian::kill(&mut child, grace).await {
                        tracing::warn!(pid, "Encoder killed after grace period");
                    } else {
                        tracing::error!(pid, "Encoder did not die; abandoning");
                    }
                    self.pid.store(0, Ordering::Release);
                    self.hub.close_all();
                    break;
                }
                ReadOutcome::Eof | ReadOutcome::Failed => {
                    let status = child.wait().await;
                    tracing::warn!(pid, status = ?status.ok(), "Encoder exited");
                    self.pid.store(0, Ordering::Release);
                    // Attached sessions tear down; clients reconnect and are
                    // primed with the next run's init segment.
                    self.hub.close_all();
                    if !sleep_cancellable(self.sup_cfg.restart_backoff_crash, &mut cancel).await {
                        break;
                    }
                }
            }
        }

        self.pid.store(0, Ordering::Release);
    }

    async fn pump_stdout(
        &self,
        mut stdout: ChildStdout,
        cancel: &mut watch::Receiver<bool>,
    ) -> ReadOutcome {
        let chunk_size = self.sup_cfg.read_chunk_size;
        let mut buf = BytesMut::with_capacity(chunk_size);

        loop {
            buf.reserve(chunk_size);
            tokio::select! {
                read = stdout.read_buf(&mut buf) => match read {
                    Ok(0) => return ReadOutcome::Eof,
                    Ok(_) => {
                        let chunk = buf.split().freeze();
                        // Same bytes go to init detection and to fan-out
                        self.init_cache.feed(&chunk);
                        self.hub.broadcast(chunk);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Encoder stdout read failed");
                        return ReadOutcome::Failed;
                    }
                },
                _ = cancel.changed() => return ReadOutcome::Canceled,
            }
        }
    }
}

/// Sleep unless canceled first; returns false on cancellation
async fn sleep_cancellable(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.changed() => false,
    }
}
