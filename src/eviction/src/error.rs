use thiserror::Error;

use crate::node::{BlockRef, NodeId};

/// Failures reported by a volume store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to read block {0}")]
    BlockRead(BlockRef),

    #[error("failed to read inode {0}")]
    NodeRead(NodeId),

    #[error("inode {0} has no index block")]
    MissingIndexBlock(NodeId),

    #[error("failed to unlink inode {id}: {reason}")]
    Unlink { id: NodeId, reason: String },

    #[error("inode {0} is not a directory")]
    NotADirectory(NodeId),

    #[error("directory {0} is full")]
    DirectoryFull(NodeId),

    #[error("invalid file name '{0}'")]
    InvalidName(String),
}

/// Errors surfaced by the registry, the policies and the control surface.
#[derive(Error, Debug)]
pub enum EvictionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] StoreError),

    #[error("no eligible file to evict")]
    NoEligibleTarget,
}

impl EvictionError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EvictionError::InvalidArgument(message.into())
    }
}
