//! Open-file detection.
//!
//! A file that some process holds open is never chosen for eviction. The
//! primary detector trusts the inode's open counters; the process-table
//! detector scans every descriptor table instead and is only meant for
//! setups where those counters cannot be trusted.

use tracing::trace;

use crate::node::{Node, NodeId};

pub trait InUseDetector: Send + Sync {
    /// True if `node` on the volume labelled `volume` is currently open.
    fn in_use(&self, volume: &str, node: &Node) -> bool;
}

/// Reports a file busy while it has open readers or writers.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCountDetector;

impl InUseDetector for OpenCountDetector {
    fn in_use(&self, volume: &str, node: &Node) -> bool {
        let busy = node.open.readers > 0 || node.open.writers > 0;
        if busy {
            trace!(
                volume,
                inode = node.id,
                readers = node.open.readers,
                writers = node.open.writers,
                "File is open"
            );
        }
        busy
    }
}

/// The file behind one open descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFile {
    pub volume: String,
    pub node: NodeId,
}

impl OpenFile {
    pub fn new(volume: impl Into<String>, node: NodeId) -> Self {
        Self {
            volume: volume.into(),
            node,
        }
    }
}

/// Descriptor table of one process. Closed slots are `None`.
#[derive(Clone, Debug, Default)]
pub struct ProcessFiles {
    pub pid: u32,
    pub fds: Vec<Option<OpenFile>>,
}

/// Source of live process descriptor tables.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<ProcessFiles>;
}

/// Fixed process table.
#[derive(Clone, Debug, Default)]
pub struct StaticProcessTable {
    processes: Vec<ProcessFiles>,
}

impl StaticProcessTable {
    pub fn new(processes: Vec<ProcessFiles>) -> Self {
        Self { processes }
    }
}

impl ProcessTable for StaticProcessTable {
    fn processes(&self) -> Vec<ProcessFiles> {
        self.processes.clone()
    }
}

/// Reports a file busy if any process has a descriptor open on it.
pub struct ProcessTableDetector<T> {
    table: T,
}

impl<T: ProcessTable> ProcessTableDetector<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }
}

impl<T: ProcessTable> InUseDetector for ProcessTableDetector<T> {
    fn in_use(&self, volume: &str, node: &Node) -> bool {
        for process in self.table.processes() {
            let found = process
                .fds
                .iter()
                .flatten()
                .any(|file| file.node == node.id && file.volume == volume);
            if found {
                trace!(volume, inode = node.id, pid = process.pid, "File is open");
                return true;
            }
        }
        false
    }
}
