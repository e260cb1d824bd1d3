//! Probe-based metadata shortcuts for the mutable file area.
//!
//! A full stat of a large directory is expensive on the daemon side. Listing
//! a path with a trailing slash is cheap and already distinguishes the three
//! cases the bridge cares about: missing, file (the not-a-directory
//! sentinel), and directory (the shallow listing itself). Only files then
//! need a real stat for their size and hash.

use std::sync::Arc;

use casfs_api::{DirEntry, EntryKind, Stat, StoreClient};

use crate::error::{translate_api, Result};
use crate::node::join_path;

/// Outcome of probing a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastListing {
    /// The path does not exist.
    Missing,
    /// The path exists but is a file.
    NotADirectory,
    /// The path is a directory with these fully populated entries.
    Entries(Vec<DirEntry>),
}

/// Shallow-probe metadata layer over a [`StoreClient`].
pub struct FastMeta {
    client: Arc<dyn StoreClient>,
    threshold: usize,
}

fn dir_probe(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

impl FastMeta {
    /// Layer over `client`, switching to bulk detailed listings above
    /// `threshold` entries.
    pub fn new(client: Arc<dyn StoreClient>, threshold: usize) -> Self {
        FastMeta { client, threshold }
    }

    /// Metadata for a path, usually in a single round trip.
    ///
    /// Directories are answered from the probe alone, with the entry count
    /// as their size and no hash. Files need a second call for their real
    /// size and hash.
    pub fn fast_stat(&self, path: &str) -> Result<Option<Stat>> {
        let probe = dir_probe(path);
        let listing = match self
            .client
            .list(&probe, false)
            .map_err(|e| translate_api("list", path, e))?
        {
            None => return Ok(None),
            Some(l) => l,
        };
        if listing.is_not_a_directory() {
            return self
                .client
                .stat(path)
                .map_err(|e| translate_api("stat", path, e));
        }
        Ok(Some(Stat {
            hash: String::new(),
            size: listing.entries.len() as u64,
            kind: EntryKind::Directory,
        }))
    }

    /// Fully populated listing of a directory.
    ///
    /// Small directories are filled in by probing each entry; past the
    /// threshold one detailed listing replaces the per-entry probes.
    pub fn fast_list(&self, path: &str) -> Result<FastListing> {
        let probe = dir_probe(path);
        let listing = match self
            .client
            .list(&probe, false)
            .map_err(|e| translate_api("list", path, e))?
        {
            None => return Ok(FastListing::Missing),
            Some(l) => l,
        };
        if listing.is_not_a_directory() {
            return Ok(FastListing::NotADirectory);
        }

        if listing.entries.len() > self.threshold {
            return match self
                .client
                .list(&probe, true)
                .map_err(|e| translate_api("list", path, e))?
            {
                None => Ok(FastListing::Missing),
                Some(detailed) => Ok(FastListing::Entries(detailed.entries)),
            };
        }

        let mut entries = listing.entries;
        for entry in &mut entries {
            let child = join_path(path, &entry.name);
            if let Some(stat) = self.fast_stat(&child)? {
                entry.kind = stat.kind;
                entry.size = stat.size;
                entry.hash = stat.hash;
            }
        }
        Ok(FastListing::Entries(entries))
    }
}
