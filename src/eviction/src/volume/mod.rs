//! Volume store contract.
//!
//! A store hands out reference-counted inodes and directory blocks. Every
//! `acquire_*` must be paired with exactly one `release_*`; [`Volume`] wraps
//! a store so the pairing is done by [`NodeGuard`] and [`BlockGuard`] on
//! drop, whatever path the caller leaves by.
//!
//! Inodes are always materialized from the store, never from a cache of
//! earlier lookups.

pub mod memory;

use std::ops::Deref;

use crate::error::StoreError;
use crate::node::{BlockRef, DirectoryBlock, Node, NodeId, ROOT_ID};
use crate::removal::Namespace;

pub trait VolumeStore: Namespace + Send + Sync {
    /// Device name, used in logs and by the in-use detectors.
    fn label(&self) -> &str;

    /// Magic number from the superblock.
    fn magic(&self) -> u32;

    fn root_id(&self) -> NodeId {
        ROOT_ID
    }

    /// Read an inode from disk and take a reference on it.
    fn acquire_node(&self, id: NodeId) -> Result<Node, StoreError>;

    fn release_node(&self, id: NodeId);

    /// Read a directory block and pin it.
    fn acquire_block(&self, block: BlockRef) -> Result<DirectoryBlock, StoreError>;

    fn release_block(&self, block: BlockRef);
}

/// Scoped access to a [`VolumeStore`].
#[derive(Clone, Copy)]
pub struct Volume<'a> {
    store: &'a dyn VolumeStore,
}

impl<'a> Volume<'a> {
    pub fn new(store: &'a dyn VolumeStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &'a dyn VolumeStore {
        self.store
    }

    pub fn label(&self) -> &'a str {
        self.store.label()
    }

    pub fn root(&self) -> Result<NodeGuard<'a>, StoreError> {
        self.node(self.store.root_id())
    }

    pub fn node(&self, id: NodeId) -> Result<NodeGuard<'a>, StoreError> {
        let node = self.store.acquire_node(id)?;
        Ok(NodeGuard {
            store: self.store,
            node,
        })
    }

    pub fn block(&self, block: BlockRef) -> Result<BlockGuard<'a>, StoreError> {
        let contents = self.store.acquire_block(block)?;
        Ok(BlockGuard {
            store: self.store,
            block,
            contents,
        })
    }
}

/// Referenced inode, released when dropped.
pub struct NodeGuard<'a> {
    store: &'a dyn VolumeStore,
    node: Node,
}

impl NodeGuard<'_> {
    /// Detached copy of the inode attributes.
    pub fn to_node(&self) -> Node {
        self.node.clone()
    }
}

impl Deref for NodeGuard<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Drop for NodeGuard<'_> {
    fn drop(&mut self) {
        self.store.release_node(self.node.id);
    }
}

/// Pinned directory block, released when dropped.
pub struct BlockGuard<'a> {
    store: &'a dyn VolumeStore,
    block: BlockRef,
    contents: DirectoryBlock,
}

impl BlockGuard<'_> {
    pub fn block_ref(&self) -> BlockRef {
        self.block
    }
}

impl Deref for BlockGuard<'_> {
    type Target = DirectoryBlock;

    fn deref(&self) -> &DirectoryBlock {
        &self.contents
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.store.release_block(self.block);
    }
}
