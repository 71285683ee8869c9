//! Removal of the file a policy selected.
//!
//! A file that has a live directory-entry alias is removed through the
//! named unlink path, after which the alias is invalidated and released.
//! Without an alias the file is detached from its parent structurally.
//! Both paths report failures as [`StoreError`].

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::node::{Node, NodeId};

/// Live directory-entry handle referencing an inode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alias {
    pub node: NodeId,
    pub name: String,
}

/// Namespace primitives a volume store offers for removal.
#[cfg_attr(test, mockall::automock)]
pub trait Namespace {
    /// Find a live alias for `child`, taking a reference on it.
    fn find_alias(&self, child: &Node) -> Option<Alias>;

    /// Named unlink of `alias` from `parent`.
    fn unlink(&self, parent: &Node, alias: &Alias) -> Result<(), StoreError>;

    /// Make the alias unreachable by later lookups.
    fn invalidate_alias(&self, alias: &Alias);

    /// Drop the reference taken by `find_alias`.
    fn release_alias(&self, alias: Alias);

    /// Detach `child` from `parent` without going through a named unlink.
    fn remove_raw(&self, parent: &Node, child: &Node) -> Result<(), StoreError>;
}

/// Which path a removal went through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalPath {
    Alias,
    Raw,
}

/// Remove `child` from `parent`.
pub fn remove_file<N>(namespace: &N, parent: &Node, child: &Node) -> Result<RemovalPath, StoreError>
where
    N: Namespace + ?Sized,
{
    match namespace.find_alias(child) {
        Some(alias) => {
            debug!(
                inode = child.id,
                name = %alias.name,
                parent = parent.id,
                "Removing file through its alias"
            );

            let ret = namespace.unlink(parent, &alias);

            namespace.invalidate_alias(&alias);
            namespace.release_alias(alias);

            ret.map(|()| RemovalPath::Alias)
        }
        None => {
            warn!(
                inode = child.id,
                parent = parent.id,
                "No alias found, removing by inode"
            );

            namespace
                .remove_raw(parent, child)
                .map(|()| RemovalPath::Raw)
        }
    }
}
