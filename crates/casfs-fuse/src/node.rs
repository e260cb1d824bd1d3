//! The cached node hierarchy shown to the kernel.
//!
//! Every kernel-visible inode is a [`Node`] in a single [`NodeTable`]. The
//! root is a mutable directory; two fixed anchors under it, `cas` and
//! `names`, open into the immutable object area and the mutable name area.
//! Nodes carry a [`Backing`] that says which addressing domain answers for
//! them and how.

use std::collections::HashMap;

use casfs_api::{DirEntry, EntryKind};

/// Kernel-visible node identifier.
pub type NodeId = u64;

/// The root directory node.
pub const ROOT_NODE: NodeId = 1;

/// Name of the immutable-object anchor directory under the root.
pub const HASH_ANCHOR: &str = "cas";

/// Name of the name-pointer anchor directory under the root.
pub const NAME_ANCHOR: &str = "names";

/// What a node looks like to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl From<EntryKind> for NodeKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => NodeKind::File,
            EntryKind::Directory => NodeKind::Directory,
        }
    }
}

/// Which addressing domain a node belongs to.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Path in the mutable file area, absolute from the store root.
    Mutable {
        /// Store path, e.g. `/docs/a.txt`.
        path: String,
    },
    /// Object in the immutable area, addressed relative to the hash anchor.
    /// The listing of a directory object is fetched once and kept here for
    /// the life of the node.
    Immutable {
        /// Hash path, e.g. `bafxyz/sub/file`.
        hash_path: String,
        /// Materialized directory listing; `None` until first opendir.
        entries: Option<Vec<DirEntry>>,
    },
    /// The fixed `cas` anchor directory.
    HashAnchor,
    /// The fixed `names` anchor directory.
    NameAnchor,
    /// A resolved name, shown as a symlink into the hash anchor.
    NameLink {
        /// Resolved destination, e.g. `/cas/bafxyz`.
        dest: String,
    },
}

impl Backing {
    /// True for nodes the kernel must never be allowed to modify.
    pub fn is_read_only(&self) -> bool {
        !matches!(self, Backing::Mutable { .. })
    }

    /// True for the two fixed anchors.
    pub fn is_anchor(&self) -> bool {
        matches!(self, Backing::HashAnchor | Backing::NameAnchor)
    }
}

/// One cached node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Kernel-visible identifier.
    pub id: NodeId,
    /// Distinguishes reuses of the same identifier.
    pub generation: u64,
    /// Parent node.
    pub parent: NodeId,
    /// Name under the parent.
    pub name: String,
    /// Kernel-visible kind.
    pub kind: NodeKind,
    /// Size in bytes for files, entry count for directories.
    pub size: u64,
    /// Content hash, when known.
    pub hash: Option<String>,
    /// Addressing domain.
    pub backing: Backing,
    /// Cached children by name.
    pub children: HashMap<String, NodeId>,
}

impl Node {
    /// The node's path in the mutable file area, if it has one.
    pub fn mutable_path(&self) -> Option<&str> {
        match &self.backing {
            Backing::Mutable { path } => Some(path),
            _ => None,
        }
    }

    /// True for directory nodes.
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Join a child name onto a mutable store path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// All cached nodes.
#[derive(Debug)]
pub struct NodeTable {
    entries: HashMap<NodeId, Node>,
    next_id: NodeId,
    next_generation: u64,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Table holding the root and the two anchors.
    pub fn new() -> Self {
        let mut table = NodeTable {
            entries: HashMap::new(),
            next_id: ROOT_NODE,
            next_generation: 1,
        };
        let root = table.insert(ROOT_NODE, ROOT_NODE, "/", NodeKind::Directory, Backing::Mutable {
            path: "/".to_string(),
        });
        debug_assert_eq!(root, ROOT_NODE);
        table.alloc(ROOT_NODE, HASH_ANCHOR, NodeKind::Directory, Backing::HashAnchor);
        table.alloc(ROOT_NODE, NAME_ANCHOR, NodeKind::Directory, Backing::NameAnchor);
        table
    }

    fn insert(
        &mut self,
        parent: NodeId,
        id: NodeId,
        name: &str,
        kind: NodeKind,
        backing: Backing,
    ) -> NodeId {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.next_id = self.next_id.max(id) + 1;
        self.entries.insert(
            id,
            Node {
                id,
                generation,
                parent,
                name: name.to_string(),
                kind,
                size: 0,
                hash: None,
                backing,
                children: HashMap::new(),
            },
        );
        id
    }

    /// Allocate a fresh node under `parent`, replacing any cached child of
    /// the same name.
    pub fn alloc(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        backing: Backing,
    ) -> NodeId {
        self.remove_child(parent, name);
        let id = self.next_id;
        self.insert(parent, id, name, kind, backing);
        if let Some(dir) = self.entries.get_mut(&parent) {
            dir.children.insert(name.to_string(), id);
        }
        id
    }

    /// Look up a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.entries.get(&id)
    }

    /// Look up a node for mutation.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.entries.get_mut(&id)
    }

    /// Cached child of a directory by name.
    pub fn child(&self, dir: NodeId, name: &str) -> Option<&Node> {
        let id = *self.entries.get(&dir)?.children.get(name)?;
        self.entries.get(&id)
    }

    /// Drop a cached child and everything under it.
    pub fn remove_child(&mut self, dir: NodeId, name: &str) {
        let child = match self.entries.get_mut(&dir) {
            Some(node) => node.children.remove(name),
            None => None,
        };
        if let Some(id) = child {
            self.remove_subtree(id);
        }
    }

    fn remove_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.entries.remove(&id) {
            for child in node.children.values() {
                self.remove_subtree(*child);
            }
        }
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no nodes are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_has_root_and_anchors() {
        let table = NodeTable::new();
        assert_eq!(table.len(), 3);
        let root = table.get(ROOT_NODE).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.mutable_path(), Some("/"));
        assert!(table.child(ROOT_NODE, HASH_ANCHOR).unwrap().backing.is_anchor());
        assert!(table.child(ROOT_NODE, NAME_ANCHOR).unwrap().backing.is_anchor());
    }

    #[test]
    fn test_alloc_replaces_same_name_child() {
        let mut table = NodeTable::new();
        let first = table.alloc(
            ROOT_NODE,
            "a",
            NodeKind::File,
            Backing::Mutable {
                path: "/a".to_string(),
            },
        );
        let second = table.alloc(
            ROOT_NODE,
            "a",
            NodeKind::Directory,
            Backing::Mutable {
                path: "/a".to_string(),
            },
        );
        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert_eq!(table.child(ROOT_NODE, "a").unwrap().id, second);
    }

    #[test]
    fn test_remove_child_drops_subtree() {
        let mut table = NodeTable::new();
        let dir = table.alloc(
            ROOT_NODE,
            "d",
            NodeKind::Directory,
            Backing::Mutable {
                path: "/d".to_string(),
            },
        );
        let file = table.alloc(
            dir,
            "f",
            NodeKind::File,
            Backing::Mutable {
                path: "/d/f".to_string(),
            },
        );
        table.remove_child(ROOT_NODE, "d");
        assert!(table.get(dir).is_none());
        assert!(table.get(file).is_none());
    }

    #[test]
    fn test_generations_are_distinct() {
        let mut table = NodeTable::new();
        let a = table.alloc(
            ROOT_NODE,
            "a",
            NodeKind::File,
            Backing::Mutable {
                path: "/a".to_string(),
            },
        );
        let gen_a = table.get(a).unwrap().generation;
        let b = table.alloc(
            ROOT_NODE,
            "a",
            NodeKind::File,
            Backing::Mutable {
                path: "/a".to_string(),
            },
        );
        assert_ne!(gen_a, table.get(b).unwrap().generation);
    }

    #[test]
    fn test_join_path_handles_root() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/d", "a"), "/d/a");
    }

    #[test]
    fn test_read_only_backing() {
        assert!(!Backing::Mutable {
            path: "/a".to_string()
        }
        .is_read_only());
        assert!(Backing::Immutable {
            hash_path: "baf".to_string(),
            entries: None
        }
        .is_read_only());
        assert!(Backing::HashAnchor.is_read_only());
        assert!(Backing::NameLink {
            dest: "/cas/baf".to_string()
        }
        .is_read_only());
    }
}
