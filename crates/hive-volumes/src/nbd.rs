//! NBD URI formats.
//!
//! Unix-socket exports use QEMU's `nbd:unix:<path>` form; TCP exports the
//! URL form `nbd://<host>:<port>`.

use std::path::{Path, PathBuf};

/// Address of an NBD export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NbdUri {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl NbdUri {
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        NbdUri::Unix(path.into())
    }

    /// Parse either accepted form.
    pub fn parse(s: &str) -> Option<NbdUri> {
        if let Some(path) = s.strip_prefix("nbd:unix:") {
            return Some(NbdUri::Unix(PathBuf::from(path)));
        }
        let rest = s.strip_prefix("nbd://")?;
        let (host, port) = rest.rsplit_once(':')?;
        Some(NbdUri::Tcp {
            host: host.to_string(),
            port: port.parse().ok()?,
        })
    }

    /// The socket path, when this is a unix export.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            NbdUri::Unix(path) => Some(path),
            NbdUri::Tcp { .. } => None,
        }
    }
}

impl std::fmt::Display for NbdUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NbdUri::Unix(path) => write!(f, "nbd:unix:{}", path.display()),
            NbdUri::Tcp { host, port } => write!(f, "nbd://{host}:{port}"),
        }
    }
}
