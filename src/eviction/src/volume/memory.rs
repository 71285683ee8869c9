//! In-memory volume store.
//!
//! Backs the operator binary (volumes loaded from JSON images) and the test
//! suites. Besides the [`VolumeStore`] contract it tracks outstanding
//! references so callers can assert that every acquire was released, and it
//! can be told to fail block reads, inode reads or unlinks.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write as _};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::node::{
    BlockRef, DirEntry, DirectoryBlock, FILENAME_LEN, MAX_SUBFILES, Node, NodeId, NodeKind,
    OUICHEFS_MAGIC, OpenCounts, ROOT_ID, Timestamps,
};
use crate::removal::{Alias, Namespace, RemovalPath};
use crate::volume::VolumeStore;

/// First block available to inodes; block 0 is the superblock.
const FIRST_DATA_BLOCK: BlockRef = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// A removal performed on the volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Removal {
    pub parent: NodeId,
    pub node: NodeId,
    pub name: String,
    pub path: RemovalPath,
}

struct Inode {
    node: Node,
    name: String,
    parent: Option<NodeId>,
}

#[derive(Default)]
struct State {
    inodes: BTreeMap<NodeId, Inode>,
    dirs: BTreeMap<BlockRef, Vec<DirEntry>>,
    next_inode: NodeId,
    next_block: BlockRef,
    node_refs: HashMap<NodeId, i64>,
    block_refs: HashMap<BlockRef, i64>,
    alias_refs: i64,
    aliases: BTreeSet<NodeId>,
    failing_blocks: HashSet<BlockRef>,
    failing_nodes: HashSet<NodeId>,
    unlink_failure: Option<String>,
    removals: Vec<Removal>,
}

impl State {
    fn alloc_block(&mut self) -> BlockRef {
        let block = self.next_block;
        self.next_block += 1;
        block
    }

    fn inode(&self, id: NodeId) -> Result<&Inode, StoreError> {
        self.inodes.get(&id).ok_or(StoreError::NodeRead(id))
    }

    fn inode_mut(&mut self, id: NodeId) -> Result<&mut Inode, StoreError> {
        self.inodes.get_mut(&id).ok_or(StoreError::NodeRead(id))
    }

    fn insert(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        size: u64,
        times: Timestamps,
    ) -> Result<NodeId, StoreError> {
        if name.is_empty() || name.len() > FILENAME_LEN || name.contains('/') {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let dir = self.inode(parent)?;
        if !dir.node.is_dir() {
            return Err(StoreError::NotADirectory(parent));
        }
        let dir_block = dir.node.index_block;
        let entries = self.dirs.get(&dir_block).ok_or(StoreError::BlockRead(dir_block))?;
        if entries.len() >= MAX_SUBFILES {
            return Err(StoreError::DirectoryFull(parent));
        }
        if entries.iter().any(|e| e.name == name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let id = self.next_inode;
        self.next_inode += 1;
        let index_block = self.alloc_block();
        if kind == NodeKind::Directory {
            self.dirs.insert(index_block, Vec::new());
        }

        self.inodes.insert(
            id,
            Inode {
                node: Node {
                    id,
                    kind,
                    size,
                    times,
                    index_block,
                    open: OpenCounts::default(),
                },
                name: name.to_string(),
                parent: Some(parent),
            },
        );
        self.dirs
            .entry(dir_block)
            .or_default()
            .push(DirEntry::new(id, name));

        Ok(id)
    }

    /// Take `child` out of `parent`'s block, keeping used slots contiguous.
    fn detach(
        &mut self,
        parent: NodeId,
        child: NodeId,
        path: RemovalPath,
    ) -> Result<(), StoreError> {
        if let Some(reason) = &self.unlink_failure {
            return Err(StoreError::Unlink {
                id: child,
                reason: reason.clone(),
            });
        }

        let dir_block = self.inode(parent)?.node.index_block;
        let entries = self.dirs.get_mut(&dir_block).ok_or(StoreError::BlockRead(dir_block))?;
        let position = entries
            .iter()
            .position(|e| e.id == child)
            .ok_or_else(|| StoreError::Unlink {
                id: child,
                reason: format!("not an entry of directory {parent}"),
            })?;
        let entry = entries.remove(position);

        let now = Utc::now();
        if let Ok(dir) = self.inode_mut(parent) {
            dir.node.times.modify = now;
            dir.node.times.change = now;
        }

        if let Some(inode) = self.inodes.remove(&child) {
            if inode.node.is_dir() {
                self.dirs.remove(&inode.node.index_block);
            }
        }
        self.aliases.remove(&child);
        self.removals.push(Removal {
            parent,
            node: child,
            name: entry.name,
            path,
        });

        Ok(())
    }
}

pub struct MemoryVolume {
    label: String,
    magic: u32,
    state: Mutex<State>,
}

impl MemoryVolume {
    /// Empty volume holding only the root directory.
    pub fn new(label: impl Into<String>) -> Self {
        let mut state = State {
            next_inode: ROOT_ID + 1,
            next_block: FIRST_DATA_BLOCK,
            ..Default::default()
        };
        let root_block = state.alloc_block();
        state.dirs.insert(root_block, Vec::new());
        state.inodes.insert(
            ROOT_ID,
            Inode {
                node: Node {
                    id: ROOT_ID,
                    kind: NodeKind::Directory,
                    size: 0,
                    times: Timestamps::now(),
                    index_block: root_block,
                    open: OpenCounts::default(),
                },
                name: "/".to_string(),
                parent: None,
            },
        );

        Self {
            label: label.into(),
            magic: OUICHEFS_MAGIC,
            state: Mutex::new(state),
        }
    }

    /// Override the superblock magic, e.g. to model a foreign filesystem.
    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn from_image(image: &VolumeImage) -> Result<Self, StoreError> {
        let volume = MemoryVolume::new(image.label.clone()).with_magic(image.magic);
        volume.populate(ROOT_ID, &image.entries)?;
        Ok(volume)
    }

    fn populate(&self, parent: NodeId, entries: &[ImageEntry]) -> Result<(), StoreError> {
        for entry in entries {
            match entry {
                ImageEntry::Dir { name, entries } => {
                    let dir = self.mkdir(parent, name)?;
                    self.populate(dir, entries)?;
                }
                ImageEntry::File {
                    name,
                    size,
                    times,
                    open,
                } => {
                    let times = times.unwrap_or_else(Timestamps::now);
                    let id = self.create_file_at(parent, name, *size, times)?;
                    self.state.lock().inode_mut(id)?.node.open = *open;
                }
            }
        }
        Ok(())
    }

    pub fn mkdir(&self, parent: NodeId, name: &str) -> Result<NodeId, StoreError> {
        self.state
            .lock()
            .insert(parent, name, NodeKind::Directory, 0, Timestamps::now())
    }

    pub fn create_file(&self, parent: NodeId, name: &str, size: u64) -> Result<NodeId, StoreError> {
        self.create_file_at(parent, name, size, Timestamps::now())
    }

    pub fn create_file_at(
        &self,
        parent: NodeId,
        name: &str,
        size: u64,
        times: Timestamps,
    ) -> Result<NodeId, StoreError> {
        self.state.lock().insert(parent, name, NodeKind::File, size, times)
    }

    pub fn open(&self, id: NodeId, mode: OpenMode) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let open = &mut state.inode_mut(id)?.node.open;
        match mode {
            OpenMode::Read => open.readers += 1,
            OpenMode::Write => open.writers += 1,
        }
        Ok(())
    }

    pub fn close(&self, id: NodeId, mode: OpenMode) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let open = &mut state.inode_mut(id)?.node.open;
        match mode {
            OpenMode::Read => open.readers = open.readers.saturating_sub(1),
            OpenMode::Write => open.writers = open.writers.saturating_sub(1),
        }
        Ok(())
    }

    /// Give `id` a live directory-entry alias, as a cached lookup would.
    pub fn cache_alias(&self, id: NodeId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.inode(id)?;
        state.aliases.insert(id);
        Ok(())
    }

    pub fn has_alias(&self, id: NodeId) -> bool {
        self.state.lock().aliases.contains(&id)
    }

    pub fn fail_block_reads(&self, block: BlockRef) {
        self.state.lock().failing_blocks.insert(block);
    }

    pub fn fail_node_reads(&self, id: NodeId) {
        self.state.lock().failing_nodes.insert(id);
    }

    /// Make every following unlink fail with `reason`.
    pub fn fail_unlinks(&self, reason: impl Into<String>) {
        self.state.lock().unlink_failure = Some(reason.into());
    }

    /// Inode attributes without taking a reference.
    pub fn stat(&self, id: NodeId) -> Option<Node> {
        self.state.lock().inodes.get(&id).map(|inode| inode.node.clone())
    }

    /// Copy of a directory's block without pinning it.
    pub fn directory(&self, id: NodeId) -> Option<DirectoryBlock> {
        let state = self.state.lock();
        let inode = state.inodes.get(&id)?;
        if !inode.node.is_dir() {
            return None;
        }
        let entries = state.dirs.get(&inode.node.index_block)?;
        Some(DirectoryBlock::new(entries.clone()))
    }

    /// Resolve an absolute path such as `/a/b.txt`.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let state = self.state.lock();
        let mut current = ROOT_ID;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let dir = state.inodes.get(&current)?;
            let entries = state.dirs.get(&dir.node.index_block)?;
            current = entries.iter().find(|e| e.name == part)?.id;
        }
        Some(current)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let state = self.state.lock();
        let mut parts = Vec::new();
        let mut current = state.inodes.get(&id)?;
        while let Some(parent) = current.parent {
            parts.push(current.name.clone());
            current = state.inodes.get(&parent)?;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    pub fn removals(&self) -> Vec<Removal> {
        self.state.lock().removals.clone()
    }

    /// References currently held on inodes, blocks and aliases.
    pub fn outstanding(&self) -> (i64, i64, i64) {
        let state = self.state.lock();
        (
            state.node_refs.values().sum(),
            state.block_refs.values().sum(),
            state.alias_refs,
        )
    }

    /// True when every acquire has been matched by exactly one release.
    pub fn handles_balanced(&self) -> bool {
        let state = self.state.lock();
        state.node_refs.values().all(|&refs| refs == 0)
            && state.block_refs.values().all(|&refs| refs == 0)
            && state.alias_refs == 0
    }

    /// Indented listing of the tree with sizes and change times.
    pub fn render_tree(&self) -> String {
        let state = self.state.lock();
        let mut out = format!("{} (magic {:#x})\n", self.label, self.magic);
        render(&state, ROOT_ID, 0, &mut out);
        out
    }
}

fn render(state: &State, dir: NodeId, depth: usize, out: &mut String) {
    let Some(inode) = state.inodes.get(&dir) else {
        return;
    };
    let Some(entries) = state.dirs.get(&inode.node.index_block) else {
        return;
    };
    for entry in entries {
        let Some(child) = state.inodes.get(&entry.id) else {
            continue;
        };
        let indent = "  ".repeat(depth + 1);
        if child.node.is_dir() {
            let _ = writeln!(out, "{indent}{}/", entry.name);
            render(state, entry.id, depth + 1, out);
        } else {
            let open = child.node.open;
            let _ = writeln!(
                out,
                "{indent}{} [ino {}, {} bytes, ctime {}{}]",
                entry.name,
                entry.id,
                child.node.size,
                child.node.times.change.to_rfc3339(),
                if open.readers + open.writers > 0 { ", open" } else { "" }
            );
        }
    }
}

impl fmt::Debug for MemoryVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryVolume")
            .field("label", &self.label)
            .field("magic", &format_args!("{:#x}", self.magic))
            .field("inodes", &self.state.lock().inodes.len())
            .finish()
    }
}

impl VolumeStore for MemoryVolume {
    fn label(&self) -> &str {
        &self.label
    }

    fn magic(&self) -> u32 {
        self.magic
    }

    fn acquire_node(&self, id: NodeId) -> Result<Node, StoreError> {
        let mut state = self.state.lock();
        if state.failing_nodes.contains(&id) {
            return Err(StoreError::NodeRead(id));
        }
        let node = state.inode(id)?.node.clone();
        *state.node_refs.entry(id).or_default() += 1;
        Ok(node)
    }

    fn release_node(&self, id: NodeId) {
        *self.state.lock().node_refs.entry(id).or_default() -= 1;
    }

    fn acquire_block(&self, block: BlockRef) -> Result<DirectoryBlock, StoreError> {
        let mut state = self.state.lock();
        if state.failing_blocks.contains(&block) {
            return Err(StoreError::BlockRead(block));
        }
        let entries = state.dirs.get(&block).ok_or(StoreError::BlockRead(block))?.clone();
        *state.block_refs.entry(block).or_default() += 1;
        Ok(DirectoryBlock::new(entries))
    }

    fn release_block(&self, block: BlockRef) {
        *self.state.lock().block_refs.entry(block).or_default() -= 1;
    }
}

impl Namespace for MemoryVolume {
    fn find_alias(&self, child: &Node) -> Option<Alias> {
        let mut state = self.state.lock();
        if !state.aliases.contains(&child.id) {
            return None;
        }
        let name = state.inodes.get(&child.id)?.name.clone();
        state.alias_refs += 1;
        Some(Alias {
            node: child.id,
            name,
        })
    }

    fn unlink(&self, parent: &Node, alias: &Alias) -> Result<(), StoreError> {
        self.state.lock().detach(parent.id, alias.node, RemovalPath::Alias)
    }

    fn invalidate_alias(&self, alias: &Alias) {
        self.state.lock().aliases.remove(&alias.node);
    }

    fn release_alias(&self, _alias: Alias) {
        self.state.lock().alias_refs -= 1;
    }

    fn remove_raw(&self, parent: &Node, child: &Node) -> Result<(), StoreError> {
        self.state.lock().detach(parent.id, child.id, RemovalPath::Raw)
    }
}

fn default_magic() -> u32 {
    OUICHEFS_MAGIC
}

/// Serialized description of a volume, loaded by the operator binary.
///
/// ```json
/// {
///   "label": "smol.img",
///   "entries": [
///     { "kind": "file", "name": "bee.txt", "size": 120 },
///     { "kind": "dir", "name": "logs", "entries": [] }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeImage {
    pub label: String,
    #[serde(default = "default_magic")]
    pub magic: u32,
    #[serde(default)]
    pub entries: Vec<ImageEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageEntry {
    Dir {
        name: String,
        #[serde(default)]
        entries: Vec<ImageEntry>,
    },
    File {
        name: String,
        #[serde(default)]
        size: u64,
        /// Missing timestamps default to load time.
        #[serde(default)]
        times: Option<Timestamps>,
        #[serde(default)]
        open: OpenCounts,
    },
}
