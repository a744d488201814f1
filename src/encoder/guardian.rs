//! Child-process guardianship
//!
//! Spawns the encoder so the whole process tree can be torn down, and
//! implements the two-stage termination ladder: polite quit (stdin `q`,
//! then a termination signal) and forceful kill. On the POSIX family the
//! child runs in its own process group so signals reach descendants; on
//! Windows it gets its own process group and `taskkill /T` reaps the tree.
//! `kill_on_drop` backstops the case where the worker itself dies.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::error::Result;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// In-band quit request understood by the encoder
const QUIT_BYTE: &[u8] = b"q";

/// Pause between the polite signal and the lethal one during a forced kill
const KILL_ESCALATION_PAUSE: Duration = Duration::from_millis(200);

/// Spawn the encoder with binary-clean stdout, line-oriented stderr, and a
/// writable stdin for the quit byte.
pub fn spawn(argv: &[String]) -> Result<Child> {
    let (bin, rest) = argv
        .split_first()
        .ok_or_else(|| crate::error::Error::Encoder("empty argv".into()))?;

    let mut cmd = Command::new(bin);
    cmd.args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

    Ok(cmd.spawn()?)
}

/// Ask the encoder to exit on its own terms.
///
/// Writes the quit byte and closes stdin, then sends the polite signal to
/// the process group (POSIX). Returns true iff the child exits within
/// `timeout`.
pub async fn terminate_graceful(child: &mut Child, timeout: Duration) -> bool {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(QUIT_BYTE).await;
        let _ = stdin.flush().await;
        // Dropping stdin closes the pipe, a second exit cue for encoders
        // that ignore the quit byte once capture has started.
    }

    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGTERM);

    wait_with_timeout(child, timeout).await
}

/// Tear down the whole encoder tree.
///
/// POSIX: polite signal to the group, a short pause, then the lethal one.
/// Windows: `taskkill /T /F` on the group. Returns true iff the child has
/// been reaped within `timeout`.
pub async fn kill(child: &mut Child, timeout: Duration) -> bool {
    #[cfg(unix)]
    {
        signal_group(child, nix::sys::signal::Signal::SIGTERM);
        tokio::time::sleep(KILL_ESCALATION_PAUSE).await;
        signal_group(child, nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(windows)]
    if let Some(pid) = child.id() {
        tokio::time::sleep(KILL_ESCALATION_PAUSE).await;
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .await;
    }

    // Direct kill as a fallback in case the group signal missed
    let _ = child.start_kill();

    wait_with_timeout(child, timeout).await
}

async fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, child.wait()).await,
        Ok(Ok(_))
    )
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill as send_signal;
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        // Negative pid targets the whole process group
        let _ = send_signal(Pid::from_raw(-(pid as i32)), signal);
    }
}
