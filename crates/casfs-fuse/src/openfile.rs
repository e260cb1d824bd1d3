//! Open file handle tracking.
//!
//! Writes are buffered daemon-side, so the bridge only needs to remember
//! whether a handle has unflushed writes; close and fsync then know whether
//! a flush call is owed. Reads through a dirty handle see the last flushed
//! state until that happens.

use std::collections::HashMap;

use crate::node::NodeId;

/// Whether a handle owes the daemon a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushState {
    /// No writes since the last flush.
    #[default]
    Flushed,
    /// Buffered writes not yet made visible.
    Unflushed,
}

/// One open file handle.
#[derive(Debug, Clone)]
pub struct OpenFile {
    /// Node the handle refers to.
    pub node: NodeId,
    /// Handle cannot write.
    pub read_only: bool,
    /// Flush bookkeeping.
    pub state: FlushState,
}

impl OpenFile {
    /// Record a buffered write.
    pub fn on_write(&mut self) {
        self.state = FlushState::Unflushed;
    }

    /// Record a completed flush.
    pub fn on_flush(&mut self) {
        self.state = FlushState::Flushed;
    }

    /// True when a flush is owed.
    pub fn needs_flush(&self) -> bool {
        self.state == FlushState::Unflushed
    }
}

/// All open handles, keyed by the file handle given to the kernel.
#[derive(Debug)]
pub struct OpenFileTable {
    handles: HashMap<u64, OpenFile>,
    next_fh: u64,
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenFileTable {
    /// Empty table. Handle 0 is reserved for directory opens, so numbering
    /// starts at 1.
    pub fn new() -> Self {
        OpenFileTable {
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    /// Register an open and hand out a file handle.
    pub fn open(&mut self, node: NodeId, read_only: bool) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(
            fh,
            OpenFile {
                node,
                read_only,
                state: FlushState::Flushed,
            },
        );
        fh
    }

    /// Look up a handle.
    pub fn get(&self, fh: u64) -> Option<&OpenFile> {
        self.handles.get(&fh)
    }

    /// Look up a handle for mutation.
    pub fn get_mut(&mut self, fh: u64) -> Option<&mut OpenFile> {
        self.handles.get_mut(&fh)
    }

    /// Drop a handle, returning its final state.
    pub fn close(&mut self, fh: u64) -> Option<OpenFile> {
        self.handles.remove(&fh)
    }
}
