//! Disk preparation for a launch.
//!
//! The daemon calls these in a fixed order — root, EFI, cloud-init — and
//! attaches the resulting requests in that order, so the boot volume is
//! always index 0.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hive_core::generate_resource_id;

use crate::cloudinit::{CloudInitSpec, build_seed_iso};
use crate::error::{VolumeError, VolumeResult};
use crate::store::{AmiMetadata, ObjectStore, VolumeConfig, VolumeStore, get_json, put_json};

/// EFI variable stores are fixed at 64 MiB.
pub const EFI_VOLUME_SIZE: u64 = 64 * 1024 * 1024;

/// Cloud-init seeds are fixed at 1 MiB.
pub const CLOUD_INIT_VOLUME_SIZE: u64 = 1024 * 1024;

/// One attached volume, in the order it will be enumerated at launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EbsRequest {
    pub volume_id: String,
    /// Set on exactly one request per VM (index 0).
    #[serde(default)]
    pub boot: bool,
    #[serde(default)]
    pub efi: bool,
    #[serde(default)]
    pub cloud_init: bool,
    #[serde(default)]
    pub delete_on_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbd_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

fn volume_config_key(volume_id: &str) -> String {
    format!("{volume_id}/config.json")
}

/// Prepare the root volume.
///
/// An `ami-` source clones the image's frozen snapshot into a freshly
/// minted volume (copy-on-write, no byte copy) and persists the linkage; a
/// `vol-` source is opened in place. Partial state is rolled back on
/// failure.
pub async fn prepare_root(
    volumes: &dyn VolumeStore,
    objects: &dyn ObjectStore,
    source: &str,
) -> VolumeResult<EbsRequest> {
    if source.starts_with("ami-") {
        let ami_config: VolumeConfig = get_json(objects, &volume_config_key(source))
            .await?
            .ok_or_else(|| VolumeError::AmiNotFound(source.to_string()))?;
        let snapshot_id = ami_config
            .snapshot_id
            .clone()
            .ok_or_else(|| VolumeError::AmiNotFound(source.to_string()))?;

        let volume_id = generate_resource_id("vol");
        if let Err(e) = volumes.clone_from_snapshot(&volume_id, &snapshot_id).await {
            // Nothing durable exists yet; drop any local remnants.
            let _ = volumes.delete(&volume_id).await;
            return Err(e);
        }

        let config = VolumeConfig {
            volume_id: volume_id.clone(),
            size_bytes: ami_config.size_bytes,
            volume_type: ami_config.volume_type.clone(),
            snapshot_id: Some(snapshot_id),
            ami: Some(AmiMetadata {
                image_id: source.to_string(),
                name: ami_config.ami.as_ref().and_then(|a| a.name.clone()),
                architecture: ami_config.ami.as_ref().and_then(|a| a.architecture.clone()),
            }),
            ..Default::default()
        };
        if let Err(e) = put_json(objects, &volume_config_key(&volume_id), &config).await {
            warn!(%volume_id, error = %e, "persisting root volume config failed; rolling back");
            let _ = volumes.delete(&volume_id).await;
            return Err(e);
        }

        info!(%volume_id, image = %source, "root volume cloned");
        Ok(EbsRequest {
            volume_id,
            boot: true,
            delete_on_termination: true,
            device_name: Some("/dev/xvda".to_string()),
            ..Default::default()
        })
    } else if source.starts_with("vol-") {
        volumes.open(source).await?;
        Ok(EbsRequest {
            volume_id: source.to_string(),
            boot: true,
            delete_on_termination: false,
            device_name: Some("/dev/xvda".to_string()),
            ..Default::default()
        })
    } else {
        Err(VolumeError::Store {
            volume_id: source.to_string(),
            detail: "root source must be an ami- or vol- ID".to_string(),
        })
    }
}

/// Prepare the EFI variable store: `<root>-efi`, one empty block written.
pub async fn prepare_efi(volumes: &dyn VolumeStore, root_id: &str) -> VolumeResult<EbsRequest> {
    let volume_id = format!("{root_id}-efi");
    volumes.create(&volume_id, EFI_VOLUME_SIZE).await?;
    volumes.write_at(&volume_id, 0, &[0u8; 4096]).await?;
    volumes.flush(&volume_id).await?;
    volumes.close(&volume_id).await?;
    info!(%volume_id, "efi volume prepared");
    Ok(EbsRequest {
        volume_id,
        efi: true,
        delete_on_termination: true,
        ..Default::default()
    })
}

/// Prepare the cloud-init seed: `<root>-cloudinit`, an ISO9660 `cidata`
/// image written at offset 0.
///
/// Only called when a key pair was named or user data supplied. A named
/// key that is absent from the object store fails the launch with
/// [`VolumeError::KeyPairNotFound`].
pub async fn prepare_cloud_init(
    volumes: &dyn VolumeStore,
    objects: &dyn ObjectStore,
    root_id: &str,
    instance_id: &str,
    account_id: &str,
    key_name: Option<&str>,
    user_data: Option<Vec<u8>>,
) -> VolumeResult<EbsRequest> {
    let ssh_key = match key_name {
        Some(name) if !name.is_empty() => {
            let key = objects
                .get(&format!("keys/{account_id}/{name}"))
                .await?
                .ok_or_else(|| VolumeError::KeyPairNotFound(name.to_string()))?;
            Some(String::from_utf8_lossy(&key).into_owned())
        }
        _ => None,
    };

    let suffix = root_id.strip_prefix("vol-").unwrap_or(root_id);
    let spec = CloudInitSpec {
        instance_id: instance_id.to_string(),
        hostname: format!("hive-vm-{suffix}"),
        ssh_key,
        user_data,
    };
    let iso = build_seed_iso(&spec);

    let volume_id = format!("{root_id}-cloudinit");
    volumes.create(&volume_id, CLOUD_INIT_VOLUME_SIZE).await?;
    if let Err(e) = async {
        volumes.write_at(&volume_id, 0, &iso).await?;
        volumes.flush(&volume_id).await?;
        volumes.close(&volume_id).await
    }
    .await
    {
        let _ = volumes.delete(&volume_id).await;
        return Err(e);
    }

    info!(%volume_id, bytes = iso.len(), "cloud-init seed prepared");
    Ok(EbsRequest {
        volume_id,
        cloud_init: true,
        delete_on_termination: true,
        ..Default::default()
    })
}
