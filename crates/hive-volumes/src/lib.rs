//! The volume layer.
//!
//! The block-storage engine itself (Viperblock) is an external
//! collaborator; this crate owns the control-plane seam the daemon talks
//! through:
//!
//! - [`VolumeStore`] / [`ObjectStore`] traits, with in-memory, filesystem
//!   and S3-compatible implementations
//! - disk preparation for a launch: root volume (snapshot clone from an
//!   AMI or direct open), EFI variable store, cloud-init seed
//! - a minimal ISO9660 writer for the `cidata` seed image
//! - NBD URI formats

mod cloudinit;
mod error;
mod iso9660;
mod nbd;
mod prepare;
mod store;

pub use cloudinit::{CloudInitSpec, build_meta_data, build_seed_iso, build_user_data};
pub use error::{VolumeError, VolumeResult};
pub use iso9660::write_iso;
pub use nbd::NbdUri;
pub use prepare::{
    CLOUD_INIT_VOLUME_SIZE, EFI_VOLUME_SIZE, EbsRequest, prepare_cloud_init, prepare_efi,
    prepare_root,
};
pub use store::{
    AmiMetadata, FsObjectStore, FsVolumeStore, MemoryObjectStore, MemoryVolumeStore, ObjectStore,
    S3ObjectStore, VolumeConfig, VolumeStore, get_json, put_json,
};
