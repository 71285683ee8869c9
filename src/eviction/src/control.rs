//! Mounted volumes and the administrative clean command.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::error::EvictionError;
use crate::node::OUICHEFS_MAGIC;
use crate::policy::CleanReport;
use crate::registry::PolicyRegistry;
use crate::volume::VolumeStore;

/// One mounted volume. A partition whose superblock could not be read
/// stays listed but cannot be cleaned.
#[derive(Clone)]
pub struct Partition {
    label: String,
    superblock: Option<Arc<dyn VolumeStore>>,
}

impl Partition {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn store(&self) -> Option<&Arc<dyn VolumeStore>> {
        self.superblock.as_ref()
    }
}

/// Mounted volumes in mount order.
#[derive(Default)]
pub struct MountTable {
    partitions: RwLock<Vec<Partition>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&self, store: Arc<dyn VolumeStore>) -> usize {
        let label = store.label().to_string();
        self.push(Partition {
            label,
            superblock: Some(store),
        })
    }

    pub fn mount_without_superblock(&self, label: impl Into<String>) -> usize {
        self.push(Partition {
            label: label.into(),
            superblock: None,
        })
    }

    fn push(&self, partition: Partition) -> usize {
        let mut partitions = self.partitions.write();
        info!(volume = partition.label(), index = partitions.len(), "Volume mounted");
        partitions.push(partition);
        partitions.len() - 1
    }

    /// Drop the first partition labelled `label`. Later indices shift down.
    pub fn unmount(&self, label: &str) -> bool {
        let mut partitions = self.partitions.write();
        match partitions.iter().position(|p| p.label == label) {
            Some(index) => {
                partitions.remove(index);
                info!(volume = label, "Volume unmounted");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<Partition> {
        self.partitions.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.partitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> Vec<String> {
        self.partitions
            .read()
            .iter()
            .map(|p| p.label.clone())
            .collect()
    }
}

/// Write-only clean command: takes the index of a mounted volume and runs
/// the active policy's partition clean on it.
#[derive(Clone)]
pub struct ControlSurface {
    mounts: Arc<MountTable>,
    registry: Arc<PolicyRegistry>,
}

impl ControlSurface {
    pub fn new(mounts: Arc<MountTable>, registry: Arc<PolicyRegistry>) -> Self {
        Self { mounts, registry }
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Handle a write of `input`, a decimal volume index.
    pub fn write_clean(&self, input: &str) -> Result<CleanReport, EvictionError> {
        let Ok(index) = input.trim().parse::<i64>() else {
            error!(input, "Invalid index");
            return Err(EvictionError::invalid(format!("invalid index '{}'", input.trim())));
        };
        if index < 0 {
            error!(index, "Invalid index, must not be negative");
            return Err(EvictionError::invalid(format!("negative index {index}")));
        }

        let partition = usize::try_from(index)
            .ok()
            .and_then(|i| self.mounts.get(i))
            .ok_or_else(|| {
                error!(index, "No partition at index, out of range");
                EvictionError::invalid(format!("no partition at index {index}"))
            })?;

        let Some(store) = partition.store() else {
            error!(index, volume = partition.label(), "Partition without superblock");
            return Err(EvictionError::invalid(format!(
                "partition {index} has no superblock"
            )));
        };

        if store.magic() != OUICHEFS_MAGIC {
            error!(
                index,
                volume = partition.label(),
                magic = %format!("{:#x}", store.magic()),
                "Partition is not ouichefs, cannot clean"
            );
            return Err(EvictionError::invalid(format!(
                "partition {index} is not an ouichefs volume"
            )));
        }

        let policy = self.registry.active();
        info!(index, volume = partition.label(), policy = policy.name(), "Cleaning partition");
        policy.clean_partition(store.as_ref())
    }
}
