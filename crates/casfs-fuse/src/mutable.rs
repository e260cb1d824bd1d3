//! Operations on the mutable file area.
//!
//! Everything here funnels through the store daemon; the node table only
//! caches what the daemon last reported. Writes are buffered daemon-side
//! and become visible on flush.

use std::sync::Arc;

use casfs_api::{Stat, StoreClient, WriteOpts};

use crate::error::{translate_api, FsError, Result};
use crate::fastmeta::{FastListing, FastMeta};
use crate::node::{join_path, Backing, NodeId, NodeKind, NodeTable};
use crate::sync::reconcile;

/// Mutable file area operations.
pub struct MutableTree {
    client: Arc<dyn StoreClient>,
    meta: FastMeta,
}

impl MutableTree {
    /// Operations over `client` with the given bulk-listing threshold.
    pub fn new(client: Arc<dyn StoreClient>, threshold: usize) -> Self {
        MutableTree {
            meta: FastMeta::new(client.clone(), threshold),
            client,
        }
    }

    fn child_path(&self, nodes: &NodeTable, parent: NodeId, name: &str) -> Result<String> {
        let dir_path = nodes
            .get(parent)
            .and_then(|n| n.mutable_path())
            .ok_or_else(|| FsError::NotFound {
                path: format!("parent of {name}"),
            })?;
        Ok(join_path(dir_path, name))
    }

    /// Resolve `name` under `parent`, refreshing or replacing the cached
    /// child.
    ///
    /// A cached child of the same kind keeps its identity; a kind change or
    /// a first sighting allocates a fresh node. A miss also evicts any stale
    /// cached child.
    pub fn lookup(&self, nodes: &mut NodeTable, parent: NodeId, name: &str) -> Result<NodeId> {
        let path = self.child_path(nodes, parent, name)?;
        let stat = match self.meta.fast_stat(&path)? {
            Some(stat) => stat,
            None => {
                nodes.remove_child(parent, name);
                return Err(FsError::NotFound { path });
            }
        };
        let kind = NodeKind::from(stat.kind);
        let existing = nodes.child(parent, name).map(|n| (n.id, n.kind));
        let id = match existing {
            Some((id, cached_kind)) if cached_kind == kind => id,
            _ => nodes.alloc(parent, name, kind, Backing::Mutable { path }),
        };
        if let Some(node) = nodes.get_mut(id) {
            node.size = stat.size;
            node.hash = if stat.hash.is_empty() {
                None
            } else {
                Some(stat.hash)
            };
        }
        Ok(id)
    }

    /// List `dir` from the daemon and reconcile the cached children.
    pub fn open_dir(&self, nodes: &mut NodeTable, dir: NodeId) -> Result<()> {
        let path = nodes
            .get(dir)
            .and_then(|n| n.mutable_path().map(str::to_string))
            .ok_or_else(|| FsError::NotFound {
                path: format!("node {dir}"),
            })?;
        match self.meta.fast_list(&path)? {
            FastListing::Missing => Err(FsError::NotFound { path }),
            FastListing::NotADirectory => Err(FsError::NotDirectory { path }),
            FastListing::Entries(entries) => {
                reconcile(nodes, dir, &entries);
                Ok(())
            }
        }
    }

    /// Fresh metadata for a path.
    pub fn getattr(&self, path: &str) -> Result<Stat> {
        self.meta.fast_stat(path)?.ok_or_else(|| FsError::NotFound {
            path: path.to_string(),
        })
    }

    /// Read from the last flushed state of a file.
    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.client
            .read(path, offset, size)
            .map_err(|e| translate_api("read", path, e))
    }

    /// Buffer a write; visible after [`MutableTree::flush`].
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.client
            .write(path, offset, data, WriteOpts::default())
            .map_err(|e| translate_api("write", path, e))
    }

    /// Make buffered writes on `path` visible.
    pub fn flush(&self, path: &str) -> Result<()> {
        self.client
            .flush(path)
            .map_err(|e| translate_api("flush", path, e))
    }

    /// Truncate a file. Only truncation to zero is expressible; any other
    /// size is refused.
    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        if size != 0 {
            return Err(FsError::Unsupported {
                op: "truncate to nonzero size",
            });
        }
        self.client
            .write(
                path,
                0,
                &[],
                WriteOpts {
                    create: false,
                    truncate: true,
                },
            )
            .map_err(|e| translate_api("truncate", path, e))
    }

    /// Create an empty file.
    pub fn create(&self, path: &str) -> Result<()> {
        self.client
            .write(
                path,
                0,
                &[],
                WriteOpts {
                    create: true,
                    truncate: false,
                },
            )
            .map_err(|e| translate_api("create", path, e))
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.client
            .mkdir(path)
            .map_err(|e| translate_api("mkdir", path, e))
    }

    /// Remove a path; directories need `recursive`.
    pub fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        self.client
            .remove(path, recursive)
            .map_err(|e| translate_api("remove", path, e))
    }

    /// Move a path.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.client
            .mv(src, dst)
            .map_err(|e| translate_api("rename", src, e))
    }

    /// Content hash of a path, straight from the daemon.
    pub fn hash_of(&self, path: &str) -> Result<Option<String>> {
        let stat = self
            .client
            .stat(path)
            .map_err(|e| translate_api("stat", path, e))?;
        Ok(stat.and_then(|s| if s.hash.is_empty() { None } else { Some(s.hash) }))
    }

    /// Path of the would-be child `name` under `parent`.
    pub fn path_under(&self, nodes: &NodeTable, parent: NodeId, name: &str) -> Result<String> {
        self.child_path(nodes, parent, name)
    }
}
