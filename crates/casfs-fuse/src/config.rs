//! Bridge configuration.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Directories larger than this are listed with one detailed call instead of
/// a per-entry probe.
pub const DEFAULT_FAST_LIST_THRESHOLD: usize = 100;

/// Settings for a mounted bridge.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Entry-count cutoff between per-entry probing and bulk detailed
    /// listing.
    pub fast_list_threshold: usize,
    /// Owner uid reported for every node.
    pub uid: u32,
    /// Owner gid reported for every node.
    pub gid: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            fast_list_threshold: DEFAULT_FAST_LIST_THRESHOLD,
            uid: 0,
            gid: 0,
        }
    }
}

impl FsConfig {
    /// Default settings with ownership taken from the mountpoint directory,
    /// so the mounted tree reports the same uid/gid as the directory it
    /// covers.
    pub fn for_mount(mountpoint: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(mountpoint)?;
        Ok(FsConfig {
            uid: meta.uid(),
            gid: meta.gid(),
            ..FsConfig::default()
        })
    }
}
