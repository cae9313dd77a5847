//! Cloud-init NoCloud seed construction.
//!
//! The seed is an ISO9660 image labelled `cidata` with two files:
//! `user-data` (cloud-config for the default user plus any user-supplied
//! payload) and `meta-data` (instance identity). User payloads ride in a
//! MIME multipart alongside our cloud-config; shell scripts and
//! cloud-configs are distinguished by their leading line.

use crate::iso9660::write_iso;

/// MIME boundary for combined user data.
const BOUNDARY: &str = "hive-part-boundary";

/// Everything the seed needs to know about one instance.
#[derive(Debug, Clone)]
pub struct CloudInitSpec {
    pub instance_id: String,
    /// `hive-vm-<root volume suffix>`.
    pub hostname: String,
    /// SSH public key for the default user, if a key pair was named.
    pub ssh_key: Option<String>,
    /// Decoded user data, if any.
    pub user_data: Option<Vec<u8>>,
}

/// The cloud-config Hive itself injects.
fn base_cloud_config(spec: &CloudInitSpec) -> String {
    let mut config = String::from("#cloud-config\n");
    config.push_str(&format!("hostname: {}\n", spec.hostname));
    config.push_str("users:\n");
    config.push_str("  - name: ec2-user\n");
    config.push_str("    sudo: ALL=(ALL) NOPASSWD:ALL\n");
    config.push_str("    shell: /bin/bash\n");
    if let Some(key) = &spec.ssh_key {
        config.push_str("    ssh_authorized_keys:\n");
        config.push_str(&format!("      - {}\n", key.trim()));
    }
    config
}

/// Build the `user-data` file.
///
/// Without user data this is a bare cloud-config. With user data it becomes
/// a multipart: our cloud-config first, then the user part typed by its
/// leading line (`#cloud-config` or a `#!` script).
pub fn build_user_data(spec: &CloudInitSpec) -> Vec<u8> {
    let base = base_cloud_config(spec);
    let Some(user_data) = &spec.user_data else {
        return base.into_bytes();
    };

    let user_type = if user_data.starts_with(b"#cloud-config") {
        "text/cloud-config"
    } else {
        "text/x-shellscript"
    };

    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "Content-Type: multipart/mixed; boundary=\"{BOUNDARY}\"\nMIME-Version: 1.0\n\n"
        )
        .as_bytes(),
    );
    out.extend_from_slice(format!("--{BOUNDARY}\n").as_bytes());
    out.extend_from_slice(b"Content-Type: text/cloud-config; charset=\"utf-8\"\n\n");
    out.extend_from_slice(base.as_bytes());
    out.extend_from_slice(format!("\n--{BOUNDARY}\n").as_bytes());
    out.extend_from_slice(format!("Content-Type: {user_type}; charset=\"utf-8\"\n\n").as_bytes());
    out.extend_from_slice(user_data);
    if !user_data.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\n").as_bytes());
    out
}

/// Build the `meta-data` file.
pub fn build_meta_data(spec: &CloudInitSpec) -> Vec<u8> {
    format!(
        "instance-id: {}\nlocal-hostname: {}\n",
        spec.instance_id, spec.hostname
    )
    .into_bytes()
}

/// Build the complete seed image.
pub fn build_seed_iso(spec: &CloudInitSpec) -> Vec<u8> {
    let user_data = build_user_data(spec);
    let meta_data = build_meta_data(spec);
    write_iso(
        "cidata",
        &[("user-data", &user_data), ("meta-data", &meta_data)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CloudInitSpec {
        CloudInitSpec {
            instance_id: "i-0123456789abcdef0".to_string(),
            hostname: "hive-vm-89abcdef0".to_string(),
            ssh_key: Some("ssh-ed25519 AAAAC3Nza test@host".to_string()),
            user_data: None,
        }
    }

    #[test]
    fn bare_cloud_config_without_user_data() {
        let data = String::from_utf8(build_user_data(&spec())).unwrap();
        assert!(data.starts_with("#cloud-config\n"));
        assert!(data.contains("hostname: hive-vm-89abcdef0"));
        assert!(data.contains("- ssh-ed25519 AAAAC3Nza test@host"));
        assert!(!data.contains("multipart"));
    }

    #[test]
    fn no_key_no_authorized_keys_block() {
        let mut spec = spec();
        spec.ssh_key = None;
        let data = String::from_utf8(build_user_data(&spec)).unwrap();
        assert!(!data.contains("ssh_authorized_keys"));
    }

    #[test]
    fn script_user_data_becomes_shellscript_part() {
        let mut spec = spec();
        spec.user_data = Some(b"#!/bin/sh\necho hello\n".to_vec());
        let data = String::from_utf8(build_user_data(&spec)).unwrap();
        assert!(data.starts_with("Content-Type: multipart/mixed"));
        assert!(data.contains("text/x-shellscript"));
        assert!(data.contains("echo hello"));
        assert!(data.contains(&format!("--{BOUNDARY}--")));
    }

    #[test]
    fn cloud_config_user_data_keeps_its_type() {
        let mut spec = spec();
        spec.user_data = Some(b"#cloud-config\npackages: [htop]\n".to_vec());
        let data = String::from_utf8(build_user_data(&spec)).unwrap();
        // Two cloud-config parts: ours and the user's.
        assert_eq!(data.matches("text/cloud-config").count(), 2);
        assert!(!data.contains("x-shellscript"));
    }

    #[test]
    fn meta_data_shape() {
        let data = String::from_utf8(build_meta_data(&spec())).unwrap();
        assert_eq!(
            data,
            "instance-id: i-0123456789abcdef0\nlocal-hostname: hive-vm-89abcdef0\n"
        );
    }

    #[test]
    fn seed_iso_is_labelled_cidata() {
        let image = build_seed_iso(&spec());
        assert!(image.len() % 2048 == 0);
        let label = &image[16 * 2048 + 40..16 * 2048 + 46];
        assert_eq!(label, b"cidata");
    }
}
