//! The RunInstances pipeline.
//!
//! Admit → mint → prepare volumes (root, EFI, cloud-init, in that order) →
//! launch the hypervisor → respond with a reservation. The attach order of
//! the prepared volumes is the device enumeration order; the boot flag is
//! set on index 0 and nowhere else.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use tracing::{error, info, warn};

use hive_broker::subjects;
use hive_core::ec2::{Instance, Reservation, RunInstancesInput};
use hive_core::error::generate_error_payload;
use hive_core::instance_types::{InstanceTypeInfo, find_type};
use hive_core::state::InstanceState;
use hive_core::{Ec2Error, Ec2ErrorCode, generate_resource_id};
use hive_vmm::{DriveSpec, MachineSpec, QmpClient, build_command};
use hive_volumes::{
    EbsRequest, ObjectStore, VolumeError, VolumeStore, prepare_cloud_init, prepare_efi,
    prepare_root,
};

use crate::control::{CmdHandler, ConsoleHandler};
use crate::error::DaemonResult;
use crate::handlers::{Handler, spawn_handler};
use crate::registry::VmHandle;
use crate::service::Daemon;
use crate::vm::{VirtualMachine, VmConfig, VmHealth};

/// Map volume-layer failures to the EC2 taxonomy.
pub(crate) fn volume_error(e: VolumeError) -> Ec2Error {
    match e {
        VolumeError::AmiNotFound(id) => Ec2Error::new(
            Ec2ErrorCode::InvalidAmiIdNotFound,
            format!("The image id {id:?} does not exist"),
        ),
        VolumeError::KeyPairNotFound(name) => Ec2Error::new(
            Ec2ErrorCode::InvalidKeyPairNotFound,
            format!("The key pair {name:?} does not exist"),
        ),
        other => Ec2Error::internal(other.to_string()),
    }
}

/// Remove volumes this launch created (and their config blobs);
/// user-supplied volumes survive.
async fn rollback(volumes: &dyn VolumeStore, objects: &dyn ObjectStore, requests: &[EbsRequest]) {
    for request in requests {
        if request.delete_on_termination {
            if let Err(e) = volumes.delete(&request.volume_id).await {
                warn!(volume_id = %request.volume_id, error = %e, "rollback delete failed");
            }
            let _ = objects
                .delete(&format!("{}/config.json", request.volume_id))
                .await;
        }
    }
}

/// Build a fully-prepared VM record, stopping short of the hypervisor.
pub(crate) async fn prepare_vm(
    catalog: &[InstanceTypeInfo],
    volumes: &dyn VolumeStore,
    objects: &dyn ObjectStore,
    node_name: &str,
    account_id: &str,
    input: &RunInstancesInput,
) -> Result<VirtualMachine, Ec2Error> {
    // Admit: only types this node exposes.
    let type_info = find_type(catalog, &input.instance_type).ok_or_else(|| {
        Ec2Error::new(
            Ec2ErrorCode::InvalidInstanceType,
            format!("instance type {:?} not offered by this node", input.instance_type),
        )
    })?;

    let instance_id = generate_resource_id("i");
    let mut requests = Vec::with_capacity(3);

    // Root first: snapshot clone for AMIs, direct open for volumes.
    let root = prepare_root(volumes, objects, &input.image_id)
        .await
        .map_err(volume_error)?;
    let root_id = root.volume_id.clone();
    requests.push(root);

    // EFI vars: required for arm64 boot, attached on q35 x86 as well.
    match prepare_efi(volumes, &root_id).await {
        Ok(request) => requests.push(request),
        Err(e) => {
            rollback(volumes, objects, &requests).await;
            return Err(volume_error(e));
        }
    }

    // Cloud-init seed, only when there is something to seed.
    let user_data = input.user_data.as_ref().map(|encoded| {
        // EC2 user data is base64; tolerate callers that skipped encoding.
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap_or_else(|_| encoded.clone().into_bytes())
    });
    let wants_seed = input.key_name.as_deref().is_some_and(|k| !k.is_empty())
        || user_data.is_some();
    if wants_seed {
        match prepare_cloud_init(
            volumes,
            objects,
            &root_id,
            &instance_id,
            account_id,
            input.key_name.as_deref(),
            user_data,
        )
        .await
        {
            Ok(request) => requests.push(request),
            Err(e) => {
                rollback(volumes, objects, &requests).await;
                return Err(volume_error(e));
            }
        }
    }

    debug_assert!(requests[0].boot && requests.iter().skip(1).all(|r| !r.boot));

    Ok(VirtualMachine {
        instance_id,
        instance_type: type_info.name.clone(),
        status: InstanceState::Provisioning,
        config: VmConfig {
            vcpus: type_info.vcpu,
            memory_mib: type_info.memory_gib as u64 * 1024,
            architecture: type_info.architecture,
            machine: None,
        },
        ebs_requests: requests,
        attributes: Default::default(),
        launch_input: input.clone(),
        reservation_id: String::new(),
        last_node: node_name.to_string(),
        health: VmHealth::default(),
        ebs_optimized: false,
        launch_time: Some(chrono::Utc::now().to_rfc3339()),
        pid: None,
        running: false,
        metadata_server_address: None,
    })
}

/// The machine spec a VM record implies.
pub(crate) fn machine_spec(vm: &VirtualMachine) -> MachineSpec {
    let drives = vm
        .ebs_requests
        .iter()
        .filter_map(|request| {
            request.nbd_uri.as_ref().map(|uri| DriveSpec {
                uri: uri.clone(),
                boot: request.boot,
                efi: request.efi,
            })
        })
        .collect();
    MachineSpec {
        name: vm.instance_id.clone(),
        architecture: vm.config.architecture,
        vcpus: vm.config.vcpus,
        memory_mib: vm.config.memory_mib,
        machine: vm.config.machine.clone(),
        drives,
        net: Vec::new(),
        extra_devices: Vec::new(),
        firmware: None,
    }
}

/// Export volumes, launch QEMU, connect the monitor, and hand the VM to
/// the exit watcher. On success the VM is `running` and owned.
pub(crate) async fn spawn_vm(daemon: &Arc<Daemon>, handle: &Arc<VmHandle>) -> DaemonResult<()> {
    let (argv, instance_id) = {
        let mut vm = handle.vm.lock().await;
        for request in &mut vm.ebs_requests {
            // Stale exports from a previous run are torn down first; each
            // mount gets a fresh uniquely-named socket.
            let _ = daemon.volumes.stop_export(&request.volume_id).await;
            let socket = daemon.paths.nbd_socket(&request.volume_id);
            let uri = daemon.volumes.export_nbd(&request.volume_id, &socket).await?;
            request.nbd_uri = Some(uri.to_string());
        }
        let spec = machine_spec(&vm);
        let argv = build_command(&spec, &daemon.paths)?;
        (argv, vm.instance_id.clone())
    };

    let child = hive_vmm::spawn(&argv)?;
    {
        let mut vm = handle.vm.lock().await;
        vm.pid = child.id();
        vm.running = true;
        vm.last_node = daemon.config.node_name.clone();
    }

    // The monitor socket appears shortly after exec; retry briefly.
    let socket = daemon.paths.monitor_socket(&instance_id);
    let mut monitor = None;
    for _ in 0..10 {
        match QmpClient::connect(&socket).await {
            Ok(client) => {
                monitor = Some(client);
                break;
            }
            Err(_) => tokio::time::sleep(std::time::Duration::from_millis(300)).await,
        }
    }
    match monitor {
        Some(mut client) => {
            match client.query_status().await {
                Ok(status) => info!(%instance_id, %status, "hypervisor monitor ready"),
                Err(e) => warn!(%instance_id, error = %e, "monitor status query failed"),
            }
            *handle.monitor.lock().await = Some(client);
        }
        None => warn!(%instance_id, "monitor socket never appeared; continuing without qmp"),
    }

    // Per-VM metadata endpoint; torn down with the other node-local
    // handles on release.
    {
        let doc = {
            let vm = handle.vm.lock().await;
            crate::metadata::MetadataDoc::from_vm(&vm, &daemon.config.az)
        };
        match crate::metadata::spawn_metadata_server(doc).await {
            Ok((addr, task)) => {
                handle.vm.lock().await.metadata_server_address = Some(addr.to_string());
                handle.subject_tasks.lock().await.push(task);
            }
            Err(e) => warn!(%instance_id, error = %e, "metadata server failed to bind"),
        }
    }

    {
        let mut vm = handle.vm.lock().await;
        vm.transition(InstanceState::Running)?;
        daemon.persist_vm(&vm).await;
    }

    claim_ownership(daemon, handle).await;
    crate::monitor::watch_exit(Arc::clone(daemon), instance_id, child);
    Ok(())
}

/// Subscribe the per-instance point subjects, making this daemon the VM's
/// single owner.
pub(crate) async fn claim_ownership(daemon: &Arc<Daemon>, handle: &Arc<VmHandle>) {
    let instance_id = handle.vm.lock().await.instance_id.clone();
    let mut tasks = handle.subject_tasks.lock().await;
    tasks.push(spawn_handler(
        daemon.broker.clone(),
        Arc::new(CmdHandler {
            daemon: Arc::clone(daemon),
            instance_id: instance_id.clone(),
        }),
        daemon.shutdown_rx(),
    ));
    tasks.push(spawn_handler(
        daemon.broker.clone(),
        Arc::new(ConsoleHandler {
            daemon: Arc::clone(daemon),
            instance_id,
        }),
        daemon.shutdown_rx(),
    ));
}

/// Handler for `ec2.RunInstances.<type>`.
pub(crate) struct RunInstancesHandler {
    pub daemon: Arc<Daemon>,
    pub instance_type: String,
}

#[async_trait]
impl Handler for RunInstancesHandler {
    fn topic(&self) -> String {
        subjects::run_instances(&self.instance_type)
    }

    fn queue(&self) -> Option<&str> {
        Some(subjects::QUEUE_GROUP)
    }

    async fn process(&self, payload: Bytes) -> Option<Vec<u8>> {
        let input: RunInstancesInput = match serde_json::from_slice(&payload) {
            Ok(input) => input,
            Err(e) => {
                return Some(generate_error_payload(&Ec2Error::new(
                    Ec2ErrorCode::ValidationError,
                    format!("malformed launch request: {e}"),
                )));
            }
        };
        match handle_run_instances(&self.daemon, input).await {
            Ok(reservation) => Some(serde_json::to_vec(&reservation).unwrap_or_else(|e| {
                generate_error_payload(&Ec2Error::internal(e.to_string()))
            })),
            Err(err) => Some(generate_error_payload(&err)),
        }
    }
}

async fn handle_run_instances(
    daemon: &Arc<Daemon>,
    input: RunInstancesInput,
) -> Result<Reservation, Ec2Error> {
    let count = input.min_count.max(1) as usize;

    let in_use = daemon.instances.len().await;
    if in_use + count > daemon.config.max_slots as usize {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InsufficientInstanceCapacity,
            format!(
                "node {} has {} of {} slots in use",
                daemon.config.node_name, in_use, daemon.config.max_slots
            ),
        ));
    }

    let reservation_id = generate_resource_id("r");
    let mut instances: Vec<Instance> = Vec::with_capacity(count);

    for _ in 0..count {
        let mut vm = prepare_vm(
            &daemon.catalog,
            daemon.volumes.as_ref(),
            daemon.objects.as_ref(),
            &daemon.config.node_name,
            &daemon.config.account_id,
            &input,
        )
        .await?;
        vm.reservation_id = reservation_id.clone();

        let handle = VmHandle::new(vm);
        daemon.instances.insert(Arc::clone(&handle)).await;

        if let Err(e) = spawn_vm(daemon, &handle).await {
            error!(error = %e, "hypervisor launch failed; rolling back");
            let vm = handle.vm.lock().await.clone();
            daemon.stop_exports(&vm).await;
            rollback(daemon.volumes.as_ref(), daemon.objects.as_ref(), &vm.ebs_requests).await;
            daemon.instances.remove(&vm.instance_id).await;
            daemon.erase_vm(&vm.instance_id).await;
            return Err(Ec2Error::internal(e.to_string()));
        }

        let vm = handle.vm.lock().await;
        instances.push(vm.instance_record(&daemon.config.az));
    }

    info!(
        reservation = %reservation_id,
        count = instances.len(),
        instance_type = %input.instance_type,
        "launch complete"
    );
    Ok(Reservation {
        reservation_id,
        owner_id: daemon.config.account_id.clone(),
        instances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::instance_types::{Architecture, CpuInfo, catalog_for};
    use hive_volumes::{MemoryObjectStore, MemoryVolumeStore, VolumeConfig, put_json};

    const CPUINFO: &str = "\
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 106
model name\t: Intel(R) Xeon(R) Platinum 8375C
flags\t\t: fpu
";

    fn catalog() -> Vec<InstanceTypeInfo> {
        let cpu = CpuInfo::from_reader(CPUINFO.as_bytes(), Architecture::X86_64).unwrap();
        catalog_for(&cpu)
    }

    async fn stores() -> (MemoryVolumeStore, MemoryObjectStore) {
        let volumes = MemoryVolumeStore::new();
        let objects = MemoryObjectStore::new();
        volumes.seed_snapshot("snap-root", b"image".to_vec());
        let config = VolumeConfig {
            volume_id: "ami-0abcdef1234567890".to_string(),
            size_bytes: 8 << 30,
            snapshot_id: Some("snap-root".to_string()),
            ..Default::default()
        };
        put_json(&objects, "ami-0abcdef1234567890/config.json", &config)
            .await
            .unwrap();
        objects
            .put(
                "keys/123456789012/my-key",
                Bytes::from_static(b"ssh-ed25519 AAAA"),
            )
            .await
            .unwrap();
        (volumes, objects)
    }

    fn launch_input() -> RunInstancesInput {
        RunInstancesInput {
            image_id: "ami-0abcdef1234567890".to_string(),
            instance_type: "t3.micro".to_string(),
            min_count: 1,
            max_count: 1,
            key_name: Some("my-key".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prepared_vm_has_boot_efi_cloudinit_in_order() {
        let (volumes, objects) = stores().await;
        let vm = prepare_vm(
            &catalog(),
            &volumes,
            &objects,
            "node1",
            "123456789012",
            &launch_input(),
        )
        .await
        .unwrap();

        assert_eq!(vm.status, InstanceState::Provisioning);
        assert_eq!(vm.ebs_requests.len(), 3);
        assert!(vm.ebs_requests[0].boot);
        assert!(vm.ebs_requests[1].efi);
        assert!(vm.ebs_requests[2].cloud_init);
        // Exactly one boot flag.
        assert_eq!(vm.ebs_requests.iter().filter(|r| r.boot).count(), 1);
        // Cloud-init volume naming invariant.
        let seed = &vm.ebs_requests[2].volume_id;
        assert!(seed.starts_with("vol-"));
        assert!(seed.ends_with("-cloudinit"));
        // Sizing came from the catalog.
        assert_eq!(vm.config.vcpus, 2);
        assert_eq!(vm.config.memory_mib, 1024);
    }

    #[tokio::test]
    async fn unknown_type_rejected_at_admission() {
        let (volumes, objects) = stores().await;
        let mut input = launch_input();
        input.instance_type = "x99.xlarge".to_string();
        let err = prepare_vm(&catalog(), &volumes, &objects, "n", "a", &input)
            .await
            .unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::InvalidInstanceType);
    }

    #[tokio::test]
    async fn unknown_ami_maps_to_not_found() {
        let (volumes, objects) = stores().await;
        let mut input = launch_input();
        input.image_id = "ami-ffffffffffffffff0".to_string();
        let err = prepare_vm(&catalog(), &volumes, &objects, "n", "a", &input)
            .await
            .unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::InvalidAmiIdNotFound);
    }

    #[tokio::test]
    async fn missing_key_rolls_back_minted_volumes() {
        let (volumes, objects) = stores().await;
        let mut input = launch_input();
        input.key_name = Some("no-such-key".to_string());
        let err = prepare_vm(&catalog(), &volumes, &objects, "n", "123456789012", &input)
            .await
            .unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::InvalidKeyPairNotFound);
        // Nothing minted for this launch survives.
        let leftovers = objects.list("vol-").await.unwrap();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn no_seed_volume_without_key_or_user_data() {
        let (volumes, objects) = stores().await;
        let mut input = launch_input();
        input.key_name = None;
        let vm = prepare_vm(&catalog(), &volumes, &objects, "n", "a", &input)
            .await
            .unwrap();
        assert_eq!(vm.ebs_requests.len(), 2);
        assert!(!vm.ebs_requests.iter().any(|r| r.cloud_init));
    }

    #[tokio::test]
    async fn machine_spec_preserves_drive_order() {
        let (volumes, objects) = stores().await;
        let mut vm = prepare_vm(
            &catalog(),
            &volumes,
            &objects,
            "node1",
            "123456789012",
            &launch_input(),
        )
        .await
        .unwrap();
        for (i, request) in vm.ebs_requests.iter_mut().enumerate() {
            request.nbd_uri = Some(format!("nbd:unix:/run/hive/nbd-{i}.sock"));
        }
        let spec = machine_spec(&vm);
        assert_eq!(spec.drives.len(), 3);
        assert!(spec.drives[0].boot);
        assert!(spec.drives[1].efi);
        assert_eq!(spec.vcpus, 2);
        assert_eq!(spec.memory_mib, 1024);
    }
}
