//! Oldest-file policy.
//!
//! Compares one timestamp of the candidate files, change time unless
//! configured otherwise. With the default [`Replacement::NotOlder`] rule a
//! leaf replaces the candidate when its timestamp is equal or newer, so the
//! pick is the first free file upgraded by ties and newer files rather than
//! the globally oldest one. [`Replacement::StrictlyOlder`] gives the strict
//! oldest-wins selection.

use std::cmp::Ordering;
use std::sync::Arc;

use common::config::{LruConfig, Replacement};
use tracing::info;

use crate::error::EvictionError;
use crate::in_use::InUseDetector;
use crate::node::{DirectoryBlock, Node};
use crate::policy::{
    CleanReport, EvictionPolicy, SelectionRule, Victim, clean_dir_with, clean_partition_with,
};
use crate::volume::VolumeStore;

pub const NAME: &str = "lru";

pub struct LruPolicy {
    config: LruConfig,
    detector: Arc<dyn InUseDetector>,
}

impl LruPolicy {
    pub fn new(config: LruConfig, detector: Arc<dyn InUseDetector>) -> Self {
        info!(
            timestamp = %config.timestamp,
            replacement = ?config.replacement,
            "Loading LRU eviction policy"
        );
        Self { config, detector }
    }

    pub fn config(&self) -> LruConfig {
        self.config
    }
}

impl SelectionRule for LruPolicy {
    fn replaces(&self, leaf: &Node, candidate: &Node) -> bool {
        let field = self.config.timestamp;
        let ordering = leaf.times.get(field).cmp(&candidate.times.get(field));
        match self.config.replacement {
            Replacement::NotOlder => ordering != Ordering::Less,
            Replacement::StrictlyOlder => ordering == Ordering::Less,
        }
    }
}

impl EvictionPolicy for LruPolicy {
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
