//! Operations on the immutable object area under the hash anchor.
//!
//! Objects never change, so a node resolved here is authoritative for its
//! whole lifetime: lookups of an already cached child answer locally, and a
//! directory object's listing is fetched exactly once.

use std::sync::Arc;

use casfs_api::{DirEntry, StoreClient};

use crate::error::{translate_api, FsError, Result};
use crate::node::{Backing, NodeId, NodeKind, NodeTable};

/// Immutable object area operations.
pub struct ImmutableTree {
    client: Arc<dyn StoreClient>,
}

fn full_path(hash_path: &str) -> String {
    format!("/cas/{hash_path}")
}

impl ImmutableTree {
    /// Operations over `client`.
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        ImmutableTree { client }
    }

    /// Resolve `name` under the hash anchor or an immutable directory.
    ///
    /// A cached immutable child is returned as-is, with no remote call.
    /// A fresh directory has its listing materialized immediately; its
    /// reported size is the entry count.
    pub fn lookup(&self, nodes: &mut NodeTable, parent: NodeId, name: &str) -> Result<NodeId> {
        if let Some(existing) = nodes.child(parent, name) {
            if matches!(existing.backing, Backing::Immutable { .. }) {
                return Ok(existing.id);
            }
        }

        let hash_path = match nodes.get(parent).map(|n| &n.backing) {
            Some(Backing::HashAnchor) => name.to_string(),
            Some(Backing::Immutable { hash_path, .. }) => format!("{hash_path}/{name}"),
            _ => {
                return Err(FsError::NotFound {
                    path: name.to_string(),
                })
            }
        };
        let path = full_path(&hash_path);
        let stat = match self
            .client
            .stat(&path)
            .map_err(|e| translate_api("stat", &path, e))?
        {
            Some(stat) => stat,
            None => {
                nodes.remove_child(parent, name);
                return Err(FsError::NotFound { path });
            }
        };

        let kind = NodeKind::from(stat.kind);
        let entries = if kind == NodeKind::Directory {
            let listing = self
                .client
                .list_object(&path)
                .map_err(|e| translate_api("ls", &path, e))?
                .ok_or_else(|| FsError::NotFound { path: path.clone() })?;
            Some(listing.entries)
        } else {
            None
        };

        let id = nodes.alloc(
            parent,
            name,
            kind,
            Backing::Immutable {
                hash_path,
                entries: None,
            },
        );
        if let Some(node) = nodes.get_mut(id) {
            node.hash = if stat.hash.is_empty() {
                None
            } else {
                Some(stat.hash)
            };
            node.size = match &entries {
                Some(entries) => entries.len() as u64,
                None => stat.size,
            };
            if let Backing::Immutable { entries: slot, .. } = &mut node.backing {
                *slot = entries;
            }
        }
        Ok(id)
    }

    /// Ensure the listing of an immutable directory is materialized. Lookup
    /// already fetches it, so this only reaches the store for directories
    /// that entered the table some other way; the listing is never fetched
    /// twice for one node.
    pub fn open_dir(&self, nodes: &mut NodeTable, dir: NodeId) -> Result<()> {
        let (hash_path, materialized) = match nodes.get(dir).map(|n| &n.backing) {
            Some(Backing::Immutable { hash_path, entries }) => {
                (hash_path.clone(), entries.is_some())
            }
            _ => {
                return Err(FsError::NotFound {
                    path: format!("node {dir}"),
                })
            }
        };
        if materialized {
            return Ok(());
        }

        let path = full_path(&hash_path);
        let listing = self
            .client
            .list_object(&path)
            .map_err(|e| translate_api("ls", &path, e))?
            .ok_or_else(|| FsError::NotFound { path: path.clone() })?;

        if let Some(node) = nodes.get_mut(dir) {
            node.size = listing.entries.len() as u64;
            if let Backing::Immutable { entries, .. } = &mut node.backing {
                *entries = Some(listing.entries);
            }
        }
        Ok(())
    }

    /// The materialized listing of an immutable directory, if fetched.
    pub fn entries<'a>(&self, nodes: &'a NodeTable, dir: NodeId) -> Option<&'a [DirEntry]> {
        match nodes.get(dir).map(|n| &n.backing) {
            Some(Backing::Immutable { entries, .. }) => entries.as_deref(),
            _ => None,
        }
    }

    /// Read object content by hash path.
    pub fn read(&self, hash_path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        let path = full_path(hash_path);
        self.client
            .cat(&path, offset, size)
            .map_err(|e| translate_api("cat", &path, e))
    }
}
