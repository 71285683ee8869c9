//! On-disk data model: inodes, directory entries and directory blocks.

use chrono::{DateTime, Utc};
use common::config::TimestampField;
use serde::{Deserialize, Serialize};

/// Inode number. Number 0 is the root directory and, inside a directory
/// block, the end-of-entries marker.
pub type NodeId = u32;

/// Block number on the device. Block 0 holds the superblock, so no inode
/// ever points its index block there.
pub type BlockRef = u32;

pub const ROOT_ID: NodeId = 0;

/// Magic number stored in the superblock of every ouichefs volume ("WICH").
pub const OUICHEFS_MAGIC: u32 = 0x4843_4957;

/// Maximum length of a file name inside a directory entry.
pub const FILENAME_LEN: usize = 28;

/// Maximum number of entries in one directory block.
pub const MAX_SUBFILES: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub access: DateTime<Utc>,
    pub modify: DateTime<Utc>,
    pub change: DateTime<Utc>,
}

impl Timestamps {
    /// All three timestamps set to the same instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            access: instant,
            modify: instant,
            change: instant,
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn get(&self, field: TimestampField) -> DateTime<Utc> {
        match field {
            TimestampField::Access => self.access,
            TimestampField::Modify => self.modify,
            TimestampField::Change => self.change,
        }
    }
}

/// Live open-file counters of an inode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCounts {
    #[serde(default)]
    pub readers: u32,
    #[serde(default)]
    pub writers: u32,
}

/// A materialized inode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub size: u64,
    pub times: Timestamps,
    /// Directory block for directories, content index block for files.
    pub index_block: BlockRef,
    pub open: OpenCounts,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// One slot of a directory block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub id: NodeId,
    pub name: String,
}

impl DirEntry {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Entry standing in for the root directory, which has no parent slot.
    pub fn root() -> Self {
        Self::new(ROOT_ID, "/")
    }

    /// A zero inode number marks the first unused slot.
    pub fn is_free(&self) -> bool {
        self.id == ROOT_ID
    }
}

/// Contents of a directory block: up to [`MAX_SUBFILES`] slots, used slots
/// first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryBlock {
    files: Vec<DirEntry>,
}

impl DirectoryBlock {
    pub fn new(files: Vec<DirEntry>) -> Self {
        Self { files }
    }

    /// Occupied slots, stopping at the first free one.
    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.files
            .iter()
            .take(MAX_SUBFILES)
            .take_while(|entry| !entry.is_free())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_SUBFILES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_stop_at_first_free_slot() {
        let block = DirectoryBlock::new(vec![
            DirEntry::new(3, "a"),
            DirEntry::new(4, "b"),
            DirEntry::new(ROOT_ID, ""),
            DirEntry::new(5, "stale"),
        ]);

        let names: Vec<_> = block.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(block.len(), 2);
        assert!(!block.is_full());
    }

    #[test]
    fn test_entries_capped_at_max_subfiles() {
        let files = (1..=MAX_SUBFILES as NodeId + 5)
            .map(|id| DirEntry::new(id, format!("f{id}")))
            .collect();
        let block = DirectoryBlock::new(files);

        assert_eq!(block.len(), MAX_SUBFILES);
        assert!(block.is_full());
    }

    #[test]
    fn test_timestamp_field_selection() {
        let times = Timestamps {
            access: DateTime::from_timestamp(1, 0).unwrap(),
            modify: DateTime::from_timestamp(2, 0).unwrap(),
            change: DateTime::from_timestamp(3, 0).unwrap(),
        };

        assert_eq!(times.get(TimestampField::Access).timestamp(), 1);
        assert_eq!(times.get(TimestampField::Modify).timestamp(), 2);
        assert_eq!(times.get(TimestampField::Change).timestamp(), 3);
    }
}
