//! Largest-file policy: the biggest free file is removed.

use std::sync::Arc;

use tracing::info;

use crate::error::EvictionError;
use crate::in_use::InUseDetector;
use crate::node::{DirectoryBlock, Node};
use crate::policy::{
    CleanReport, EvictionPolicy, SelectionRule, Victim, clean_dir_with, clean_partition_with,
};
use crate::volume::VolumeStore;

pub const NAME: &str = "size";

pub struct SizePolicy {
    detector: Arc<dyn InUseDetector>,
}

impl SizePolicy {
    pub fn new(detector: Arc<dyn InUseDetector>) -> Self {
        info!("Loading size eviction policy");
        Self { detector }
    }
}

impl SelectionRule for SizePolicy {
    fn replaces(&self, leaf: &Node, candidate: &Node) -> bool {
        leaf.size > candidate.size
    }
}

impl EvictionPolicy for SizePolicy {
    fn name(&self) -> &str {
        NAME
    }

    fn clean_partition(&self, store: &dyn VolumeStore) -> Result<CleanReport, EvictionError> {
        clean_partition_with(store, self.detector.as_ref(), self)
    }

    fn clean_dir(
        &self,
        store: &dyn VolumeStore,
        parent: &Node,
        files: &DirectoryBlock,
    ) -> Result<Victim, EvictionError> {
        clean_dir_with(store, self.detector.as_ref(), self, parent, files)
    }
}
