//! The name-pointer area under the `names` anchor.
//!
//! A name resolves to a `/cas/...` destination and is shown to the kernel
//! as a relative symlink into the hash anchor, so following it lands on the
//! immutable object the name currently points at.

use std::sync::Arc;

use casfs_api::StoreClient;

use crate::error::{translate_api, FsError, Result};
use crate::node::{Backing, NodeId, NodeKind, NodeTable};

/// Name-pointer operations.
pub struct NameTree {
    client: Arc<dyn StoreClient>,
}

/// Symlink target for a resolved destination. The leading `..` climbs out
/// of the names anchor so the absolute `/cas/...` destination becomes a
/// path under the mount point.
pub fn link_target(dest: &str) -> String {
    format!("..{dest}")
}

impl NameTree {
    /// Operations over `client`.
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        NameTree { client }
    }

    /// Resolve `name` under the names anchor.
    ///
    /// Names are re-resolved on every lookup; the cached node survives only
    /// while the destination is unchanged.
    pub fn lookup(&self, nodes: &mut NodeTable, anchor: NodeId, name: &str) -> Result<NodeId> {
        let shown = format!("/names/{name}");
        let dest = self
            .client
            .resolve(name)
            .map_err(|e| translate_api("resolve", &shown, e))?
            .ok_or_else(|| {
                nodes.remove_child(anchor, name);
                FsError::NotFound { path: shown }
            })?;

        if let Some(existing) = nodes.child(anchor, name) {
            if let Backing::NameLink { dest: cached } = &existing.backing {
                if *cached == dest {
                    return Ok(existing.id);
                }
            }
        }

        let size = link_target(&dest).len() as u64;
        let id = nodes.alloc(anchor, name, NodeKind::Symlink, Backing::NameLink { dest });
        if let Some(node) = nodes.get_mut(id) {
            node.size = size;
        }
        Ok(id)
    }
}
