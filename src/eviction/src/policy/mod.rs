//! Eviction policies and the candidate selection they share.
//!
//! A policy decides which single file to remove. Both built-in policies
//! follow the same shape: walk the tree (or one directory), skip busy
//! files, keep one candidate and let a [`SelectionRule`] decide whether the
//! current leaf replaces it. Only the comparison differs.

pub mod lru;
pub mod size;

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::{EvictionError, StoreError};
use crate::in_use::InUseDetector;
use crate::node::{DirEntry, DirectoryBlock, Node, NodeId};
use crate::removal::{RemovalPath, remove_file};
use crate::traverse::{Context, Traversal, Visitor, traverse};
use crate::volume::{Volume, VolumeStore};

/// Name of the built-in policy that never removes anything.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// A strategy for choosing the file to evict.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Walk the whole volume and remove at most one file.
    ///
    /// A failed removal is reported in the returned [`CleanReport`], not as
    /// an error.
    fn clean_partition(&self, store: &dyn VolumeStore) -> Result<CleanReport, EvictionError>;

    /// Remove one file among the direct children of `parent`, whose block is
    /// `files`. Subdirectories are never chosen.
    fn clean_dir(
        &self,
        store: &dyn VolumeStore,
        parent: &Node,
        files: &DirectoryBlock,
    ) -> Result<Victim, EvictionError>;
}

/// Comparison deciding whether a leaf takes over the current candidate.
pub trait SelectionRule {
    fn replaces(&self, leaf: &Node, candidate: &Node) -> bool;
}

/// The file a policy removed or tried to remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Victim {
    pub id: NodeId,
    pub name: String,
    pub parent: NodeId,
    pub size: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Eviction {
    Removed(Victim),
    RemovalFailed { victim: Victim, error: StoreError },
    NothingEligible,
}

/// Outcome of a partition clean.
#[derive(Debug, PartialEq, Eq)]
pub struct CleanReport {
    pub traversal: Traversal,
    pub eviction: Eviction,
}

impl CleanReport {
    pub fn victim(&self) -> Option<&Victim> {
        match &self.eviction {
            Eviction::Removed(victim) => Some(victim),
            Eviction::RemovalFailed { victim, .. } => Some(victim),
            Eviction::NothingEligible => None,
        }
    }

    pub fn removed(&self) -> bool {
        matches!(self.eviction, Eviction::Removed(_))
    }

    pub fn is_partial(&self) -> bool {
        !self.traversal.is_complete()
    }

    /// View the report as a result, with nothing to remove as
    /// [`EvictionError::NoEligibleTarget`].
    pub fn into_result(self) -> Result<Option<Victim>, EvictionError> {
        match self.eviction {
            Eviction::Removed(victim) => Ok(Some(victim)),
            Eviction::RemovalFailed { .. } => Ok(None),
            Eviction::NothingEligible => Err(EvictionError::NoEligibleTarget),
        }
    }
}

impl fmt::Display for CleanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.eviction {
            Eviction::Removed(v) => write!(f, "removed '{}' (inode {}, {} bytes)", v.name, v.id, v.size)?,
            Eviction::RemovalFailed { victim, error } => {
                write!(f, "failed to remove '{}' (inode {}): {error}", victim.name, victim.id)?
            }
            Eviction::NothingEligible => write!(f, "nothing to evict")?,
        }
        if let Traversal::Partial(truncation) = &self.traversal {
            write!(
                f,
                " (walk stopped at inode {}, depth {}: {})",
                truncation.node, truncation.depth, truncation.error
            )?;
        }
        Ok(())
    }
}

/// The (parent, child) pair currently chosen for removal.
#[derive(Clone, Debug)]
struct Candidate {
    parent: Node,
    child: Node,
    name: String,
}

impl Candidate {
    fn victim(&self) -> Victim {
        Victim {
            id: self.child.id,
            name: self.name.clone(),
            parent: self.parent.id,
            size: self.child.size,
        }
    }
}

/// Leaf visitor keeping the best candidate seen so far.
struct CandidateCollector<'a, R: ?Sized> {
    volume: &'a str,
    detector: &'a dyn InUseDetector,
    rule: &'a R,
    candidate: Option<Candidate>,
}

impl<'a, R: SelectionRule + ?Sized> CandidateCollector<'a, R> {
    fn new(volume: &'a str, detector: &'a dyn InUseDetector, rule: &'a R) -> Self {
        Self {
            volume,
            detector,
            rule,
            candidate: None,
        }
    }

    fn offer(&mut self, parent: &Node, child: &Node, name: &str) {
        debug!(volume = self.volume, inode = child.id, name, "Inspecting file");

        if self.detector.in_use(self.volume, child) {
            debug!(volume = self.volume, inode = child.id, name, "File in use, skipping");
            return;
        }

        let replace = match &self.candidate {
            None => true,
            Some(candidate) => self.rule.replaces(child, &candidate.child),
        };
        if replace {
            debug!(volume = self.volume, inode = child.id, name, "New candidate");
            self.candidate = Some(Candidate {
                parent: parent.clone(),
                child: child.clone(),
                name: name.to_string(),
            });
        }
    }
}

impl<R: SelectionRule + ?Sized> Visitor for CandidateCollector<'_, R> {
    fn leaf(&mut self, parent: &Context<'_>, child: &Context<'_>) {
        self.offer(parent.node, child.node, child.name());
    }
}

/// Partition clean shared by the built-in policies.
pub(crate) fn clean_partition_with<R>(
    store: &dyn VolumeStore,
    detector: &dyn InUseDetector,
    rule: &R,
) -> Result<CleanReport, EvictionError>
where
    R: SelectionRule + ?Sized,
{
    let volume = Volume::new(store);
    let root = volume.root()?;
    if root.index_block == 0 {
        return Err(StoreError::MissingIndexBlock(root.id).into());
    }
    let block = volume.block(root.index_block)?;

    let entry = DirEntry::root();
    let mut collector = CandidateCollector::new(volume.label(), detector, rule);
    let traversal = traverse(&volume, &block, &Context::new(&entry, &root), &mut collector);
    drop(block);

    let eviction = match collector.candidate {
        Some(candidate) if candidate.child.id != root.id => {
            let victim = candidate.victim();
            match remove_candidate(&volume, &candidate) {
                Ok(path) => {
                    info!(
                        volume = volume.label(),
                        inode = victim.id,
                        name = %victim.name,
                        size = victim.size,
                        ?path,
                        "Evicted file"
                    );
                    Eviction::Removed(victim)
                }
                Err(error) => {
                    error!(
                        volume = volume.label(),
                        inode = victim.id,
                        name = %victim.name,
                        %error,
                        "Failed to remove file"
                    );
                    Eviction::RemovalFailed { victim, error }
                }
            }
        }
        _ => {
            info!(volume = volume.label(), "No file to evict");
            Eviction::NothingEligible
        }
    };

    Ok(CleanReport {
        traversal,
        eviction,
    })
}

/// Directory clean shared by the built-in policies.
pub(crate) fn clean_dir_with<R>(
    store: &dyn VolumeStore,
    detector: &dyn InUseDetector,
    rule: &R,
    parent: &Node,
    files: &DirectoryBlock,
) -> Result<Victim, EvictionError>
where
    R: SelectionRule + ?Sized,
{
    let volume = Volume::new(store);
    let mut collector = CandidateCollector::new(volume.label(), detector, rule);

    for entry in files.entries() {
        let child = volume.node(entry.id)?;
        if child.is_dir() {
            continue;
        }
        collector.offer(parent, &child, &entry.name);
    }

    let Some(candidate) = collector.candidate else {
        warn!(volume = volume.label(), dir = parent.id, "No file to evict in directory");
        return Err(EvictionError::NoEligibleTarget);
    };

    let victim = candidate.victim();
    let path = remove_candidate(&volume, &candidate)?;
    info!(
        volume = volume.label(),
        inode = victim.id,
        name = %victim.name,
        dir = parent.id,
        ?path,
        "Evicted file from directory"
    );
    Ok(victim)
}

/// Re-read both inodes and hand them to the removal executor.
fn remove_candidate(volume: &Volume<'_>, candidate: &Candidate) -> Result<RemovalPath, StoreError> {
    let parent = volume.node(candidate.parent.id)?;
    let child = volume.node(candidate.child.id)?;
    remove_file(volume.store(), &parent, &child)
}

/// Registered at startup and never removed. Logs and does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicy;

impl EvictionPolicy for DefaultPolicy {
    fn name(&self) -> &str {
        DEFAULT_POLICY_NAME
    }

    fn clean_partition(&self, store: &dyn VolumeStore) -> Result<CleanReport, EvictionError> {
        info!(volume = store.label(), "Default policy, not evicting");
        Ok(CleanReport {
            traversal: Traversal::Complete,
            eviction: Eviction::NothingEligible,
        })
    }

    fn clean_dir(
        &self,
        store: &dyn VolumeStore,
        parent: &Node,
        _files: &DirectoryBlock,
    ) -> Result<Victim, EvictionError> {
        info!(volume = store.label(), dir = parent.id, "Default policy, not evicting");
        Err(EvictionError::NoEligibleTarget)
    }
}
