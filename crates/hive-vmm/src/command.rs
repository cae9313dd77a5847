//! QEMU argument construction.
//!
//! Builds the full argv for a machine spec. The drive list is emitted in
//! the order given (boot volume first by contract), each with its own
//! iothread. arm64 guests use the `virt` machine and UEFI firmware from a
//! fixed path; a missing firmware file is fatal for the launch.

use std::path::{Path, PathBuf};

use tracing::warn;

use hive_core::instance_types::Architecture;

use crate::error::{VmmError, VmmResult};
use crate::paths::RuntimePaths;

/// Default UEFI firmware locations.
const AAVMF_CODE: &str = "/usr/share/AAVMF/AAVMF_CODE.fd";
const OVMF_CODE: &str = "/usr/share/OVMF/OVMF_CODE.fd";

/// One virtual drive, already exported over NBD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSpec {
    /// `nbd:unix:<path>` or `nbd://host:port`.
    pub uri: String,
    /// The boot volume (index 0 by contract).
    pub boot: bool,
    /// EFI variable store; attached as pflash rather than a disk.
    pub efi: bool,
}

/// Host network backend + guest device pass-through pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevSpec {
    /// `-netdev` value, e.g. `user,id=net0,hostfwd=tcp::2222-:22`.
    pub netdev: String,
    /// `-device` value, e.g. `virtio-net-pci,netdev=net0`.
    pub device: String,
}

/// Everything needed to assemble a QEMU invocation.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    /// Instance ID; names the PID file, monitor socket and console log.
    pub name: String,
    pub architecture: Architecture,
    pub vcpus: u32,
    pub memory_mib: u64,
    /// Machine type; defaults to `q35` on x86_64 and `virt` on arm64.
    pub machine: Option<String>,
    pub drives: Vec<DriveSpec>,
    pub net: Vec<NetDevSpec>,
    /// Raw `-device` pass-throughs.
    pub extra_devices: Vec<String>,
    /// Override the firmware path (tests; defaults per architecture).
    pub firmware: Option<PathBuf>,
}

impl MachineSpec {
    fn machine_type(&self) -> &str {
        match &self.machine {
            Some(m) => m.as_str(),
            None => match self.architecture {
                Architecture::X86_64 => "q35",
                Architecture::Arm64 => "virt",
            },
        }
    }
}

fn kvm_available() -> bool {
    Path::new("/dev/kvm").exists()
}

/// Default firmware path for an architecture.
pub fn default_firmware(architecture: Architecture) -> PathBuf {
    PathBuf::from(match architecture {
        Architecture::Arm64 => AAVMF_CODE,
        Architecture::X86_64 => OVMF_CODE,
    })
}

/// Startup check: arm64 guests cannot boot without UEFI firmware, so an
/// arm64 node without it must not come up at all.
pub fn verify_firmware(architecture: Architecture) -> VmmResult<()> {
    if architecture == Architecture::Arm64 {
        let firmware = default_firmware(architecture);
        if !firmware.exists() {
            return Err(VmmError::FirmwareMissing(firmware.display().to_string()));
        }
    }
    Ok(())
}

/// Build the argv (program first) for this machine.
pub fn build_command(spec: &MachineSpec, paths: &RuntimePaths) -> VmmResult<Vec<String>> {
    if spec.drives.is_empty() {
        return Err(VmmError::Spec("no drives attached".to_string()));
    }
    if spec.drives.iter().filter(|d| d.boot).count() != 1 {
        return Err(VmmError::Spec("exactly one boot drive required".to_string()));
    }

    let program = match spec.architecture {
        Architecture::X86_64 => "qemu-system-x86_64",
        Architecture::Arm64 => "qemu-system-aarch64",
    };
    let machine_type = spec.machine_type();

    let mut argv: Vec<String> = vec![program.to_string()];
    argv.extend(["-name".into(), format!("guest={}", spec.name)]);
    argv.extend([
        "-pidfile".into(),
        paths.pid_file(&spec.name).display().to_string(),
    ]);
    argv.extend([
        "-qmp".into(),
        format!(
            "unix:{},server,nowait",
            paths.monitor_socket(&spec.name).display()
        ),
    ]);

    // Machine and acceleration.
    let mut machine_arg = machine_type.to_string();
    if kvm_available() {
        machine_arg.push_str(",accel=kvm");
        argv.extend(["-enable-kvm".into()]);
        argv.extend(["-cpu".into(), "host".into()]);
    } else {
        warn!(instance = %spec.name, "/dev/kvm not present; falling back to TCG emulation");
        argv.extend(["-cpu".into(), "max".into()]);
    }
    argv.extend(["-machine".into(), machine_arg]);

    argv.extend(["-display".into(), "none".into()]);
    argv.extend(["-smp".into(), spec.vcpus.to_string()]);
    argv.extend(["-m".into(), format!("{}M", spec.memory_mib)]);

    // Serial console to a log file.
    argv.extend([
        "-chardev".into(),
        format!(
            "file,id=char0,path={}",
            paths.console_log(&spec.name).display()
        ),
    ]);
    argv.extend(["-serial".into(), "chardev:char0".into()]);

    // UEFI firmware. Required for arm64 virt; attached on x86_64 only when
    // the machine is q35 and an EFI vars drive is present.
    let wants_efi = spec.drives.iter().any(|d| d.efi);
    let firmware = spec
        .firmware
        .clone()
        .unwrap_or_else(|| default_firmware(spec.architecture));
    if spec.architecture == Architecture::Arm64 {
        if !firmware.exists() {
            return Err(VmmError::FirmwareMissing(firmware.display().to_string()));
        }
        argv.extend([
            "-drive".into(),
            format!(
                "if=pflash,format=raw,readonly=on,file={}",
                firmware.display()
            ),
        ]);
    } else if wants_efi && machine_type == "q35" && firmware.exists() {
        argv.extend([
            "-drive".into(),
            format!(
                "if=pflash,format=raw,readonly=on,file={}",
                firmware.display()
            ),
        ]);
    }

    // Drives, in list order. Each disk gets its own iothread.
    let mut disk_index = 0;
    for drive in &spec.drives {
        if drive.efi {
            argv.extend([
                "-drive".into(),
                format!("if=pflash,format=raw,file={}", drive.uri),
            ]);
            continue;
        }
        argv.extend([
            "-object".into(),
            format!("iothread,id=iothread{disk_index}"),
        ]);
        argv.extend([
            "-drive".into(),
            format!(
                "file={},format=raw,if=none,id=disk{disk_index},cache=none,aio=threads",
                drive.uri
            ),
        ]);
        let bootindex = if drive.boot { ",bootindex=0" } else { "" };
        argv.extend([
            "-device".into(),
            format!(
                "virtio-blk-pci,drive=disk{disk_index},iothread=iothread{disk_index}{bootindex}"
            ),
        ]);
        disk_index += 1;
    }

    for net in &spec.net {
        argv.extend(["-netdev".into(), net.netdev.clone()]);
        argv.extend(["-device".into(), net.device.clone()]);
    }
    for device in &spec.extra_devices {
        argv.extend(["-device".into(), device.clone()]);
    }

    Ok(argv)
}
