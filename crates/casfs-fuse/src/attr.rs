//! Attribute synthesis for cached nodes.
//!
//! The store keeps no ownership or timestamps, so attributes are synthetic:
//! a fixed epoch-adjacent timestamp, the mounting user as owner, and
//! permissions derived from whether the addressing domain is writable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};

use crate::node::{Node, NodeKind};

/// Cache validity handed to the kernel with every attribute reply.
pub const TTL: Duration = Duration::from_secs(1);

fn stamp() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1)
}

/// 512-byte blocks backing `size` bytes.
pub fn blocks_for_size(size: u64) -> u64 {
    size.div_ceil(512)
}

/// Kernel file type for a node kind.
pub fn fuser_kind(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
        NodeKind::Symlink => FileType::Symlink,
    }
}

/// Attributes for an ordinary node.
pub fn node_attr(node: &Node, uid: u32, gid: u32) -> FileAttr {
    let read_only = node.backing.is_read_only();
    let (kind, perm, nlink) = match node.kind {
        NodeKind::File => (
            FileType::RegularFile,
            if read_only { 0o444 } else { 0o644 },
            1,
        ),
        NodeKind::Directory => (
            FileType::Directory,
            if read_only { 0o555 } else { 0o755 },
            2,
        ),
        NodeKind::Symlink => (FileType::Symlink, 0o444, 1),
    };
    FileAttr {
        ino: node.id,
        size: node.size,
        blocks: blocks_for_size(node.size),
        atime: stamp(),
        mtime: stamp(),
        ctime: stamp(),
        crtime: UNIX_EPOCH,
        kind,
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Attributes for the two anchors: traversable but not listable.
pub fn anchor_attr(node: &Node, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino: node.id,
        size: 0,
        blocks: 0,
        atime: stamp(),
        mtime: stamp(),
        ctime: stamp(),
        crtime: UNIX_EPOCH,
        kind: FileType::Directory,
        perm: 0o111,
        nlink: 2,
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}
