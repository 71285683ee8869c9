//! Space reclamation for ouichefs volumes.
//!
//! When a volume runs low on space, the active eviction policy walks the
//! directory tree, picks one file and removes it. This crate provides the
//! pieces every policy is built from:
//!
//! - `volume`: the contract a volume store fulfils, with scoped node and
//!   directory-block handles, plus an in-memory store
//! - `traverse`: the depth-first walk driving policy visitors
//! - `in_use`: open-file detection so live files are never chosen
//! - `removal`: alias-aware unlink of the chosen file
//! - `registry`: registered policies and the active selection
//! - `policy`: the oldest-file (`lru`) and largest-file (`size`) policies
//! - `control`: mounted volumes and the administrative clean command
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use eviction::in_use::OpenCountDetector;
//! use eviction::policy::size::SizePolicy;
//! use eviction::registry::PolicyRegistry;
//! use eviction::volume::memory::MemoryVolume;
//!
//! let registry = PolicyRegistry::new();
//! registry.register(Arc::new(SizePolicy::new(Arc::new(OpenCountDetector))))?;
//!
//! let volume = MemoryVolume::new("smol.img");
//! let report = registry.active().clean_partition(&volume)?;
//! println!("{report}");
//! # Ok::<(), eviction::EvictionError>(())
//! ```

pub mod control;
pub mod error;
pub mod in_use;
pub mod node;
pub mod policy;
pub mod registry;
pub mod removal;
pub mod traverse;
pub mod volume;

// Re-export commonly used types
pub use control::{ControlSurface, MountTable};
pub use error::{EvictionError, StoreError};
pub use node::{BlockRef, DirEntry, DirectoryBlock, Node, NodeId, NodeKind, Timestamps};
pub use policy::{CleanReport, Eviction, EvictionPolicy, Victim};
pub use registry::{PolicyId, PolicyRegistry};
pub use traverse::{Traversal, Truncation, Visitor};
pub use volume::{Volume, VolumeStore};
