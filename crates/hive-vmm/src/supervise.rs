//! Subprocess supervision.
//!
//! Launch QEMU detached from the daemon's stdio and stop it with a
//! graceful-signal-then-kill escalation: SIGTERM, wait up to the grace
//! period, then SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{VmmError, VmmResult};

/// How long a guest gets to shut down before SIGKILL.
pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(120);

/// Spawn the hypervisor from a prebuilt argv (program first).
pub fn spawn(argv: &[String]) -> VmmResult<Child> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        VmmError::Spec("empty command".to_string())
    })?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| VmmError::Spawn {
            program: program.clone(),
            source,
        })?;
    info!(%program, pid = child.id(), "hypervisor spawned");
    Ok(child)
}

/// Stop a child: SIGTERM first, SIGKILL after `grace`.
///
/// Returns the exit status. Safe to call on a child that already exited.
pub async fn graceful_stop(child: &mut Child, grace: Duration) -> VmmResult<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        // SIGTERM lets QEMU flush and remove its pidfile.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return Ok(status?),
            Err(_) => {
                warn!(pid, grace_secs = grace.as_secs(), "graceful stop expired; killing");
                child.kill().await?;
            }
        }
    }
    Ok(child.wait().await?)
}
