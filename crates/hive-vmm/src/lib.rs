//! Hypervisor glue.
//!
//! The daemon drives QEMU as a subprocess: this crate owns the runtime
//! directory (PID files, monitor sockets, console logs), builds the QEMU
//! argument vector for a machine spec, speaks QMP to the monitor socket,
//! and supervises the process with graceful-stop escalation.

mod command;
mod error;
mod paths;
mod qmp;
mod supervise;

pub use command::{
    DriveSpec, MachineSpec, NetDevSpec, build_command, default_firmware, verify_firmware,
};
pub use error::{VmmError, VmmResult};
pub use paths::{RuntimePaths, read_pid_file, runtime_dir, write_pid_file};
pub use qmp::QmpClient;
pub use supervise::{GRACEFUL_STOP_TIMEOUT, graceful_stop, spawn};
