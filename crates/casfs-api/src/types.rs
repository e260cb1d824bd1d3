//! Wire types shared by every store client implementation.

use serde::{Deserialize, Serialize};

/// Kind of an entry as reported by the store daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file content.
    #[default]
    File,
    /// Directory node.
    Directory,
}

impl EntryKind {
    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Metadata for a single path or object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Content hash; empty when not cheaply available.
    #[serde(default)]
    pub hash: String,
    /// Size in bytes for files; entry count for directories reported by the
    /// fast path.
    #[serde(default)]
    pub size: u64,
    /// File or directory.
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
}

/// One entry of a directory listing.
///
/// Shallow listings only carry `name`; the remaining fields keep their zero
/// values until filled in by a detailed listing or a per-entry stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name relative to the listed directory.
    pub name: String,
    /// File or directory.
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    /// Size in bytes (files) or entry count (directories).
    #[serde(default)]
    pub size: u64,
    /// Content hash; empty when unknown.
    #[serde(default)]
    pub hash: String,
}

/// A directory listing as returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Entries in daemon order.
    #[serde(default)]
    pub entries: Vec<DirEntry>,
}

impl Listing {
    /// The daemon signals "this path is not a directory" by answering a
    /// listing request with a single unnamed entry.
    pub fn is_not_a_directory(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].name.is_empty()
    }

    /// Build the not-a-directory sentinel.
    pub fn not_a_directory() -> Self {
        Listing {
            entries: vec![DirEntry {
                name: String::new(),
                kind: EntryKind::File,
                size: 0,
                hash: String::new(),
            }],
        }
    }
}

/// Options for a deferred-flush write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOpts {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Truncate the file before writing.
    pub truncate: bool,
}
