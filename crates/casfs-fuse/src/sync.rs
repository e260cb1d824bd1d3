//! Reconciliation of a cached mutable directory with a fresh listing.

use casfs_api::DirEntry;

use crate::node::{
    join_path, Backing, NodeId, NodeKind, NodeTable, HASH_ANCHOR, NAME_ANCHOR, ROOT_NODE,
};

/// Bring the cached children of `dir` in line with `listing`.
///
/// A cached child that appears in the listing with the same kind keeps its
/// identity; its size and hash are refreshed in place. A kind change or a
/// listed name with no cached child allocates a fresh node. Cached children
/// absent from the listing are dropped. The two anchors under the root are
/// outside the mutable domain and are never touched, and backend entries
/// that shadow their names are ignored.
pub fn reconcile(nodes: &mut NodeTable, dir: NodeId, listing: &[DirEntry]) {
    let dir_path = match nodes.get(dir).and_then(|n| n.mutable_path().map(str::to_string)) {
        Some(p) => p,
        None => return,
    };

    for entry in listing {
        if dir == ROOT_NODE && (entry.name == HASH_ANCHOR || entry.name == NAME_ANCHOR) {
            continue;
        }
        let kind = NodeKind::from(entry.kind);
        let existing = nodes.child(dir, &entry.name).map(|n| (n.id, n.kind));
        let id = match existing {
            Some((id, cached_kind)) if cached_kind == kind => id,
            _ => nodes.alloc(
                dir,
                &entry.name,
                kind,
                Backing::Mutable {
                    path: join_path(&dir_path, &entry.name),
                },
            ),
        };
        if let Some(node) = nodes.get_mut(id) {
            node.size = entry.size;
            node.hash = if entry.hash.is_empty() {
                None
            } else {
                Some(entry.hash.clone())
            };
        }
    }

    let stale: Vec<String> = match nodes.get(dir) {
        Some(node) => node
            .children
            .keys()
            .filter(|name| {
                if dir == ROOT_NODE && (*name == HASH_ANCHOR || *name == NAME_ANCHOR) {
                    return false;
                }
                !listing.iter().any(|e| e.name == **name)
            })
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    for name in stale {
        nodes.remove_child(dir, &name);
    }
}
