//! Process-local runtime state: PID files, monitor sockets, console logs.
//!
//! Resolution order for the runtime directory: `$XDG_RUNTIME_DIR/hive`,
//! then `~/hive`, then a `hive` directory under the system temp dir. The
//! directory is created at daemon startup, before any subject is
//! subscribed; failure to do so is fatal.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{VmmError, VmmResult};

/// Resolve and create the runtime directory.
pub fn runtime_dir() -> VmmResult<PathBuf> {
    let base = if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg).join("hive")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join("hive")
    } else {
        std::env::temp_dir().join("hive")
    };
    std::fs::create_dir_all(&base)
        .map_err(|e| VmmError::RuntimeDir(format!("{}: {e}", base.display())))?;
    debug!(path = %base.display(), "runtime directory ready");
    Ok(base)
}

/// Well-known file locations under the runtime directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<name>.pid` — ASCII decimal PID.
    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.pid"))
    }

    /// `<name>.sock` — QMP monitor socket.
    pub fn monitor_socket(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.sock"))
    }

    /// `<name>.log` — serial console capture.
    pub fn console_log(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.log"))
    }

    /// `nbd-<volume>-<unix-nanos>.sock` — unique per mount so a stale
    /// export can never be picked up by a relaunch.
    pub fn nbd_socket(&self, volume_id: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        self.root.join(format!("nbd-{volume_id}-{nanos}.sock"))
    }
}

/// Write a PID file (ASCII decimal).
pub fn write_pid_file(path: &Path, pid: u32) -> VmmResult<()> {
    std::fs::write(path, pid.to_string()).map_err(|e| VmmError::PidFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Read a PID file back.
pub fn read_pid_file(path: &Path) -> VmmResult<u32> {
    let content = std::fs::read_to_string(path).map_err(|e| VmmError::PidFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    content.trim().parse().map_err(|_| VmmError::PidFile {
        path: path.display().to_string(),
        detail: format!("not a pid: {content:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-test.pid");
        write_pid_file(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
        assert_eq!(read_pid_file(&path).unwrap(), 4242);
    }

    #[test]
    fn pid_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(read_pid_file(&path).is_err());
    }

    #[test]
    fn nbd_sockets_are_unique_per_mount() {
        let paths = RuntimePaths::new(PathBuf::from("/run/hive"));
        let a = paths.nbd_socket("vol-0123456789abcdef0");
        let b = paths.nbd_socket("vol-0123456789abcdef0");
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("nbd-vol-0123456789abcdef0-"));
        assert!(name.ends_with(".sock"));
    }

    #[test]
    fn well_known_names() {
        let paths = RuntimePaths::new(PathBuf::from("/run/hive"));
        assert_eq!(paths.pid_file("i-1"), PathBuf::from("/run/hive/i-1.pid"));
        assert_eq!(paths.monitor_socket("i-1"), PathBuf::from("/run/hive/i-1.sock"));
        assert_eq!(paths.console_log("i-1"), PathBuf::from("/run/hive/i-1.log"));
    }
}
