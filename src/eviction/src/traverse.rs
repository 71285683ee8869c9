//! Generic depth-first walk over a volume's directory tree.
//!
//! The walk knows nothing about eviction: policies plug in through
//! [`Visitor`]. Each entry is re-read from the store, visited, and released
//! before the next one. A directory whose block or inode cannot be read
//! stops the whole walk; what was visited so far stands and the outcome is
//! reported as [`Traversal::Partial`].

use tracing::warn;

use crate::error::StoreError;
use crate::node::{DirEntry, DirectoryBlock, Node, NodeId};
use crate::volume::Volume;

/// Where the walk currently is: a directory entry and its inode.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub entry: &'a DirEntry,
    pub node: &'a Node,
}

impl<'a> Context<'a> {
    pub fn new(entry: &'a DirEntry, node: &'a Node) -> Self {
        Self { entry, node }
    }

    pub fn name(&self) -> &'a str {
        &self.entry.name
    }
}

/// Hooks invoked by [`traverse`]. All of them are optional.
pub trait Visitor {
    /// Called before descending into a subdirectory.
    fn before_dir(&mut self, _dir: &Context<'_>) {}

    /// Called after a subdirectory's subtree has been walked.
    fn after_dir(&mut self, _dir: &Context<'_>) {}

    /// Called once for every file, with the directory holding it.
    fn leaf(&mut self, _parent: &Context<'_>, _child: &Context<'_>) {}
}

/// Where a walk stopped early.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Truncation {
    /// Entry that could not be read.
    pub node: NodeId,
    /// Depth of that entry; children of the starting directory are at 1.
    pub depth: usize,
    pub error: StoreError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Traversal {
    Complete,
    Partial(Truncation),
}

impl Traversal {
    pub fn is_complete(&self) -> bool {
        matches!(self, Traversal::Complete)
    }
}

/// Walk `dir`, the block of the directory described by `current`, in
/// pre-order.
pub fn traverse<V: Visitor + ?Sized>(
    volume: &Volume<'_>,
    dir: &DirectoryBlock,
    current: &Context<'_>,
    visitor: &mut V,
) -> Traversal {
    match walk(volume, dir, current, visitor, 1) {
        Ok(()) => Traversal::Complete,
        Err(truncation) => {
            warn!(
                volume = volume.label(),
                inode = truncation.node,
                depth = truncation.depth,
                error = %truncation.error,
                "Traversal stopped early"
            );
            Traversal::Partial(truncation)
        }
    }
}

fn walk<V: Visitor + ?Sized>(
    volume: &Volume<'_>,
    dir: &DirectoryBlock,
    current: &Context<'_>,
    visitor: &mut V,
    depth: usize,
) -> Result<(), Truncation> {
    for entry in dir.entries() {
        let truncated = |error: StoreError| Truncation {
            node: entry.id,
            depth,
            error,
        };

        let node = volume.node(entry.id).map_err(truncated)?;
        let child = Context::new(entry, &node);

        if node.is_dir() {
            let block = volume.block(node.index_block).map_err(truncated)?;

            visitor.before_dir(&child);
            walk(volume, &block, &child, visitor, depth + 1)?;
            visitor.after_dir(&child);
        } else {
            visitor.leaf(current, &child);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::memory::MemoryVolume;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Visitor for Recorder {
        fn before_dir(&mut self, dir: &Context<'_>) {
            self.events.push(format!("enter {}", dir.name()));
        }

        fn after_dir(&mut self, dir: &Context<'_>) {
            self.events.push(format!("leave {}", dir.name()));
        }

        fn leaf(&mut self, parent: &Context<'_>, child: &Context<'_>) {
            self.events
                .push(format!("leaf {}/{}", parent.name(), child.name()));
        }
    }

    fn walk_root(volume: &MemoryVolume, visitor: &mut Recorder) -> Traversal {
        let volume = Volume::new(volume);
        let root = volume.root().unwrap();
        let block = volume.block(root.index_block).unwrap();
        let entry = DirEntry::root();
        traverse(&volume, &block, &Context::new(&entry, &root), visitor)
    }

    #[test]
    fn test_preorder_with_hooks() {
        let volume = MemoryVolume::new("test");
        let a = volume.mkdir(0, "a").unwrap();
        volume.create_file(a, "x", 1).unwrap();
        volume.create_file(0, "y", 1).unwrap();

        let mut recorder = Recorder::default();
        let outcome = walk_root(&volume, &mut recorder);

        assert_eq!(outcome, Traversal::Complete);
        assert_eq!(
            recorder.events,
            vec!["enter a", "leaf a/x", "leave a", "leaf //y"]
        );
        assert!(volume.handles_balanced());
    }

    #[test]
    fn test_visitor_without_hooks_walks_silently() {
        struct Nothing;
        impl Visitor for Nothing {}

        let volume = MemoryVolume::new("test");
        let a = volume.mkdir(0, "a").unwrap();
        volume.create_file(a, "x", 1).unwrap();

        let volume_ref = Volume::new(&volume);
        let root = volume_ref.root().unwrap();
        let block = volume_ref.block(root.index_block).unwrap();
        let entry = DirEntry::root();
        let outcome = traverse(&volume_ref, &block, &Context::new(&entry, &root), &mut Nothing);

        assert!(outcome.is_complete());
        drop(block);
        drop(root);
        assert!(volume.handles_balanced());
    }

    #[test]
    fn test_unreadable_inode_truncates() {
        let volume = MemoryVolume::new("test");
        volume.create_file(0, "first", 1).unwrap();
        let broken = volume.create_file(0, "broken", 1).unwrap();
        volume.create_file(0, "never", 1).unwrap();
        volume.fail_node_reads(broken);

        let mut recorder = Recorder::default();
        let outcome = walk_root(&volume, &mut recorder);

        assert_eq!(recorder.events, vec!["leaf //first"]);
        assert_eq!(
            outcome,
            Traversal::Partial(Truncation {
                node: broken,
                depth: 1,
                error: StoreError::NodeRead(broken),
            })
        );
        assert!(volume.handles_balanced());
    }
}
