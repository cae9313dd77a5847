//! Storage-engine control-plane traits and their backends.
//!
//! The daemon never talks to a storage engine directly; it goes through
//! [`VolumeStore`] (block volumes) and [`ObjectStore`] (config blobs, SSH
//! keys, tag maps). Backends:
//!
//! - `Memory*` — unit tests
//! - `Fs*` — single-host development: sparse image files with `qemu-nbd`
//!   unix-socket exports, blobs as plain files
//! - `S3ObjectStore` — any S3-compatible endpoint (Predastore included)
//!
//! The production block engine lives behind the same [`VolumeStore`] seam
//! and is out of scope here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{VolumeError, VolumeResult};
use crate::nbd::NbdUri;

/// Metadata persisted per volume at `<volumeID>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeConfig {
    pub volume_id: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    /// The frozen snapshot this volume was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<AmiMetadata>,
}

fn default_volume_type() -> String {
    "gp3".to_string()
}

/// AMI linkage carried in a volume's config block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AmiMetadata {
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

/// Blob storage: volume configs, SSH keys, tag maps.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> VolumeResult<Option<Bytes>>;
    async fn put(&self, key: &str, data: Bytes) -> VolumeResult<()>;
    async fn delete(&self, key: &str) -> VolumeResult<()>;
    /// Keys under `prefix`, in unspecified order.
    async fn list(&self, prefix: &str) -> VolumeResult<Vec<String>>;
}

/// Block-volume control plane.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Create an empty volume of the given size.
    async fn create(&self, volume_id: &str, size_bytes: u64) -> VolumeResult<()>;
    /// Open an existing volume.
    async fn open(&self, volume_id: &str) -> VolumeResult<()>;
    /// Create a writable volume whose initial contents are a frozen
    /// snapshot (copy-on-write; no byte copy in the real engine).
    async fn clone_from_snapshot(&self, volume_id: &str, snapshot_id: &str) -> VolumeResult<()>;
    async fn write_at(&self, volume_id: &str, offset: u64, data: &[u8]) -> VolumeResult<()>;
    async fn read_at(&self, volume_id: &str, offset: u64, len: usize) -> VolumeResult<Vec<u8>>;
    async fn flush(&self, volume_id: &str) -> VolumeResult<()>;
    async fn close(&self, volume_id: &str) -> VolumeResult<()>;
    /// Persist volume state so another node can open it.
    async fn save_state(&self, volume_id: &str) -> VolumeResult<()>;
    async fn delete(&self, volume_id: &str) -> VolumeResult<()>;
    async fn exists(&self, volume_id: &str) -> VolumeResult<bool>;
    /// Export the volume over NBD at the given unix socket path.
    async fn export_nbd(&self, volume_id: &str, socket: &Path) -> VolumeResult<NbdUri>;
    /// Tear down an export created by [`VolumeStore::export_nbd`].
    async fn stop_export(&self, volume_id: &str) -> VolumeResult<()>;
}

// ── In-memory backends (tests) ─────────────────────────────────────

#[derive(Default)]
struct MemVolume {
    size: u64,
    data: Vec<u8>,
    open: bool,
}

/// Volume store backed by heap buffers.
#[derive(Default)]
pub struct MemoryVolumeStore {
    volumes: Mutex<HashMap<String, MemVolume>>,
}

impl MemoryVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snapshot for clone tests.
    pub fn seed_snapshot(&self, snapshot_id: &str, data: Vec<u8>) {
        let mut volumes = self.volumes.lock().unwrap();
        volumes.insert(
            snapshot_id.to_string(),
            MemVolume {
                size: data.len() as u64,
                data,
                open: false,
            },
        );
    }
}

#[async_trait]
impl VolumeStore for MemoryVolumeStore {
    async fn create(&self, volume_id: &str, size_bytes: u64) -> VolumeResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(volume_id) {
            return Err(VolumeError::AlreadyExists(volume_id.to_string()));
        }
        volumes.insert(
            volume_id.to_string(),
            MemVolume {
                size: size_bytes,
                data: Vec::new(),
                open: true,
            },
        );
        Ok(())
    }

    async fn open(&self, volume_id: &str) -> VolumeResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| VolumeError::NotFound(volume_id.to_string()))?;
        volume.open = true;
        Ok(())
    }

    async fn clone_from_snapshot(&self, volume_id: &str, snapshot_id: &str) -> VolumeResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(volume_id) {
            return Err(VolumeError::AlreadyExists(volume_id.to_string()));
        }
        let snapshot = volumes
            .get(snapshot_id)
            .ok_or_else(|| VolumeError::NotFound(snapshot_id.to_string()))?;
        let clone = MemVolume {
            size: snapshot.size,
            data: snapshot.data.clone(),
            open: true,
        };
        volumes.insert(volume_id.to_string(), clone);
        Ok(())
    }

    async fn write_at(&self, volume_id: &str, offset: u64, data: &[u8]) -> VolumeResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| VolumeError::NotFound(volume_id.to_string()))?;
        let end = offset as usize + data.len();
        if volume.data.len() < end {
            volume.data.resize(end, 0);
        }
        volume.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn read_at(&self, volume_id: &str, offset: u64, len: usize) -> VolumeResult<Vec<u8>> {
        let volumes = self.volumes.lock().unwrap();
        let volume = volumes
            .get(volume_id)
            .ok_or_else(|| VolumeError::NotFound(volume_id.to_string()))?;
        let mut out = vec![0u8; len];
        let start = (offset as usize).min(volume.data.len());
        let end = (offset as usize + len).min(volume.data.len());
        out[..end - start].copy_from_slice(&volume.data[start..end]);
        Ok(out)
    }

    async fn flush(&self, _volume_id: &str) -> VolumeResult<()> {
        Ok(())
    }

    async fn close(&self, volume_id: &str) -> VolumeResult<()> {
        let mut volumes = self.volumes.lock().unwrap();
        if let Some(volume) = volumes.get_mut(volume_id) {
            volume.open = false;
        }
        Ok(())
    }

    async fn save_state(&self, _volume_id: &str) -> VolumeResult<()> {
        Ok(())
    }

    async fn delete(&self, volume_id: &str) -> VolumeResult<()> {
        self.volumes.lock().unwrap().remove(volume_id);
        Ok(())
    }

    async fn exists(&self, volume_id: &str) -> VolumeResult<bool> {
        Ok(self.volumes.lock().unwrap().contains_key(volume_id))
    }

    async fn export_nbd(&self, volume_id: &str, socket: &Path) -> VolumeResult<NbdUri> {
        if !self.exists(volume_id).await? {
            return Err(VolumeError::NotFound(volume_id.to_string()));
        }
        Ok(NbdUri::Unix(socket.to_path_buf()))
    }

    async fn stop_export(&self, _volume_id: &str) -> VolumeResult<()> {
        Ok(())
    }
}

/// Object store backed by a map.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> VolumeResult<Option<Bytes>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, data: Bytes) -> VolumeResult<()> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> VolumeResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> VolumeResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ── Filesystem backends (single-host development) ──────────────────

/// Volumes as sparse image files, exported with `qemu-nbd`.
pub struct FsVolumeStore {
    base: PathBuf,
    exports: Mutex<HashMap<String, tokio::process::Child>>,
}

impl FsVolumeStore {
    pub fn new(base: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            exports: Mutex::new(HashMap::new()),
        })
    }

    fn image_path(&self, volume_id: &str) -> PathBuf {
        self.base.join(format!("{volume_id}.img"))
    }

    fn require(&self, volume_id: &str) -> VolumeResult<PathBuf> {
        let path = self.image_path(volume_id);
        if !path.exists() {
            return Err(VolumeError::NotFound(volume_id.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl VolumeStore for FsVolumeStore {
    async fn create(&self, volume_id: &str, size_bytes: u64) -> VolumeResult<()> {
        let path = self.image_path(volume_id);
        if path.exists() {
            return Err(VolumeError::AlreadyExists(volume_id.to_string()));
        }
        let file = std::fs::File::create(&path)?;
        file.set_len(size_bytes)?;
        debug!(%volume_id, size_bytes, "volume created");
        Ok(())
    }

    async fn open(&self, volume_id: &str) -> VolumeResult<()> {
        self.require(volume_id).map(|_| ())
    }

    async fn clone_from_snapshot(&self, volume_id: &str, snapshot_id: &str) -> VolumeResult<()> {
        let target = self.image_path(volume_id);
        if target.exists() {
            return Err(VolumeError::AlreadyExists(volume_id.to_string()));
        }
        let source = self.require(snapshot_id)?;
        std::fs::copy(&source, &target)?;
        info!(%volume_id, %snapshot_id, "volume cloned from snapshot");
        Ok(())
    }

    async fn write_at(&self, volume_id: &str, offset: u64, data: &[u8]) -> VolumeResult<()> {
        use std::io::{Seek, SeekFrom, Write};
        let path = self.require(volume_id)?;
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    async fn read_at(&self, volume_id: &str, offset: u64, len: usize) -> VolumeResult<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};
        let path = self.require(volume_id)?;
        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut out = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut out[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(out)
    }

    async fn flush(&self, volume_id: &str) -> VolumeResult<()> {
        let path = self.require(volume_id)?;
        std::fs::OpenOptions::new()
            .write(true)
            .open(path)?
            .sync_all()?;
        Ok(())
    }

    async fn close(&self, _volume_id: &str) -> VolumeResult<()> {
        Ok(())
    }

    async fn save_state(&self, volume_id: &str) -> VolumeResult<()> {
        self.flush(volume_id).await
    }

    async fn delete(&self, volume_id: &str) -> VolumeResult<()> {
        let path = self.image_path(volume_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn exists(&self, volume_id: &str) -> VolumeResult<bool> {
        Ok(self.image_path(volume_id).exists())
    }

    async fn export_nbd(&self, volume_id: &str, socket: &Path) -> VolumeResult<NbdUri> {
        let path = self.require(volume_id)?;
        let child = tokio::process::Command::new("qemu-nbd")
            .arg("--format")
            .arg("raw")
            .arg("--socket")
            .arg(socket)
            .arg(&path)
            .spawn()
            .map_err(|e| VolumeError::Export {
                volume_id: volume_id.to_string(),
                detail: e.to_string(),
            })?;
        self.exports
            .lock()
            .unwrap()
            .insert(volume_id.to_string(), child);
        info!(%volume_id, socket = %socket.display(), "nbd export started");
        Ok(NbdUri::Unix(socket.to_path_buf()))
    }

    async fn stop_export(&self, volume_id: &str) -> VolumeResult<()> {
        let child = self.exports.lock().unwrap().remove(volume_id);
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!(%volume_id, error = %e, "stopping nbd export");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }
}

/// Blobs as plain files under a base directory.
pub struct FsObjectStore {
    base: PathBuf,
}

impl FsObjectStore {
    pub fn new(base: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> VolumeResult<Option<Bytes>> {
        match std::fs::read(self.blob_path(key)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VolumeError::Object {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> VolumeResult<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &data).map_err(|e| VolumeError::Object {
            key: key.to_string(),
            detail: e.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> VolumeResult<()> {
        match std::fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::Object {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> VolumeResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.base) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}

// ── S3-compatible backend ──────────────────────────────────────────

/// Object store over any S3-compatible endpoint, Predastore included.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client for a custom endpoint with static credentials.
    pub fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "hive-config",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> VolumeResult<Option<Bytes>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(output) => {
                let data = output.body.collect().await.map_err(|e| VolumeError::Object {
                    key: key.to_string(),
                    detail: e.to_string(),
                })?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    Ok(None)
                } else {
                    Err(VolumeError::Object {
                        key: key.to_string(),
                        detail: e.to_string(),
                    })
                }
            }
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> VolumeResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(|e| VolumeError::Object {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> VolumeResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| VolumeError::Object {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> VolumeResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|e| VolumeError::Object {
                key: prefix.to_string(),
                detail: e.to_string(),
            })?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}

/// JSON helpers shared by callers of [`ObjectStore`].
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> VolumeResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|source| VolumeError::Decode {
                key: key.to_string(),
                source,
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> VolumeResult<()> {
    let bytes = serde_json::to_vec(value).map_err(VolumeError::Encode)?;
    store.put(key, bytes.into()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_volume_lifecycle() {
        let store = MemoryVolumeStore::new();
        store.create("vol-a", 1024).await.unwrap();
        assert!(store.exists("vol-a").await.unwrap());
        store.write_at("vol-a", 4, b"hive").await.unwrap();
        let back = store.read_at("vol-a", 4, 4).await.unwrap();
        assert_eq!(back, b"hive");
        store.close("vol-a").await.unwrap();
        store.delete("vol-a").await.unwrap();
        assert!(!store.exists("vol-a").await.unwrap());
    }

    #[tokio::test]
    async fn memory_create_twice_fails() {
        let store = MemoryVolumeStore::new();
        store.create("vol-a", 1024).await.unwrap();
        assert!(matches!(
            store.create("vol-a", 1024).await,
            Err(VolumeError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn memory_clone_copies_snapshot() {
        let store = MemoryVolumeStore::new();
        store.seed_snapshot("snap-1", b"frozen".to_vec());
        store.clone_from_snapshot("vol-b", "snap-1").await.unwrap();
        let back = store.read_at("vol-b", 0, 6).await.unwrap();
        assert_eq!(back, b"frozen");
        // Writes diverge from the snapshot.
        store.write_at("vol-b", 0, b"THAWED").await.unwrap();
        let snap = store.read_at("snap-1", 0, 6).await.unwrap();
        assert_eq!(snap, b"frozen");
    }

    #[tokio::test]
    async fn memory_clone_missing_snapshot_fails() {
        let store = MemoryVolumeStore::new();
        assert!(matches!(
            store.clone_from_snapshot("vol-b", "snap-missing").await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fs_volume_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVolumeStore::new(dir.path()).unwrap();
        store.create("vol-a", 1 << 20).await.unwrap();
        store.write_at("vol-a", 100, b"data").await.unwrap();
        assert_eq!(store.read_at("vol-a", 100, 4).await.unwrap(), b"data");
        // Sparse allocation: logical size, not blocks written.
        let meta = std::fs::metadata(dir.path().join("vol-a.img")).unwrap();
        assert_eq!(meta.len(), 1 << 20);
        store.delete("vol-a").await.unwrap();
        assert!(!store.exists("vol-a").await.unwrap());
    }

    #[tokio::test]
    async fn fs_clone_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVolumeStore::new(dir.path()).unwrap();
        store.create("snap-1", 64).await.unwrap();
        store.write_at("snap-1", 0, b"golden").await.unwrap();
        store.clone_from_snapshot("vol-c", "snap-1").await.unwrap();
        assert_eq!(store.read_at("vol-c", 0, 6).await.unwrap(), b"golden");
    }

    #[tokio::test]
    async fn memory_object_store_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .put("tags/i-1.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            store.get("tags/i-1.json").await.unwrap(),
            Some(Bytes::from_static(b"{}"))
        );
        assert_eq!(store.list("tags/").await.unwrap(), vec!["tags/i-1.json"]);
        store.delete("tags/i-1.json").await.unwrap();
        assert_eq!(store.get("tags/i-1.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_object_store_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        store
            .put("keys/123456789012/my-key", Bytes::from_static(b"ssh-ed25519 AAAA"))
            .await
            .unwrap();
        let got = store.get("keys/123456789012/my-key").await.unwrap().unwrap();
        assert_eq!(&got[..], b"ssh-ed25519 AAAA");
        let listed = store.list("keys/").await.unwrap();
        assert_eq!(listed, vec!["keys/123456789012/my-key"]);
        assert_eq!(store.get("keys/none").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = MemoryObjectStore::new();
        let config = VolumeConfig {
            volume_id: "vol-1".to_string(),
            size_bytes: 10 << 30,
            snapshot_id: Some("snap-1".to_string()),
            ..Default::default()
        };
        put_json(&store, "vol-1/config.json", &config).await.unwrap();
        let back: VolumeConfig = get_json(&store, "vol-1/config.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back, config);
        let missing: Option<VolumeConfig> = get_json(&store, "vol-2/config.json").await.unwrap();
        assert!(missing.is_none());
    }
}
