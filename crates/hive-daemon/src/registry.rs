//! The in-memory VM registry.
//!
//! The map itself takes a shared lock for reads and an exclusive lock for
//! insert/delete; each VM is then locked individually, so state
//! transitions for one VM are totally ordered without serializing the
//! whole fleet.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use hive_vmm::QmpClient;

use crate::vm::VirtualMachine;

/// A live VM: the record plus its node-local handles.
pub struct VmHandle {
    pub vm: Mutex<VirtualMachine>,
    /// Monitor connection, owned here and closed explicitly on release.
    pub monitor: Mutex<Option<QmpClient>>,
    /// Point-subject subscription tasks (`ec2.cmd.<id>`, console output);
    /// aborted on release so the subjects free up for the next owner.
    pub subject_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VmHandle {
    pub fn new(vm: VirtualMachine) -> Arc<VmHandle> {
        Arc::new(VmHandle {
            vm: Mutex::new(vm),
            monitor: Mutex::new(None),
            subject_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Drop node-local handles: close the monitor, abort the point
    /// subscriptions.
    pub async fn release(&self) {
        *self.monitor.lock().await = None;
        for task in self.subject_tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

/// All VMs this daemon currently knows about.
#[derive(Default)]
pub struct Instances {
    vms: RwLock<HashMap<String, Arc<VmHandle>>>,
}

impl Instances {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<VmHandle>) {
        let instance_id = handle.vm.lock().await.instance_id.clone();
        self.vms.write().await.insert(instance_id, handle);
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<VmHandle>> {
        self.vms.read().await.get(instance_id).cloned()
    }

    pub async fn remove(&self, instance_id: &str) -> Option<Arc<VmHandle>> {
        self.vms.write().await.remove(instance_id)
    }

    pub async fn len(&self) -> usize {
        self.vms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vms.read().await.is_empty()
    }

    /// Clone every record (for describes; the clones are snapshots).
    pub async fn snapshot(&self) -> Vec<VirtualMachine> {
        let handles: Vec<Arc<VmHandle>> = self.vms.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.vm.lock().await.clone());
        }
        records
    }
}
