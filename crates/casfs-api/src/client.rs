//! The remote store surface consumed by the bridge.

use crate::error::ApiError;
use crate::types::{Listing, Stat, WriteOpts};

/// Interface to the remote store daemon.
///
/// Every call blocks until the daemon answers or the transport fails. Paths
/// are absolute: `/`-rooted for the mutable file area, `/cas/<hash>[/...]`
/// for the immutable object area. Operations that can miss return
/// `Ok(None)` when the daemon explicitly reported "file does not exist";
/// every other failure is an error.
pub trait StoreClient: Send + Sync {
    /// Detailed metadata for a path.
    fn stat(&self, path: &str) -> Result<Option<Stat>, ApiError>;

    /// List a directory. `detailed` requests full per-entry metadata in one
    /// round trip; a shallow listing carries names only. Listing a file
    /// yields the not-a-directory sentinel.
    fn list(&self, path: &str, detailed: bool) -> Result<Option<Listing>, ApiError>;

    /// Read up to `count` bytes at `offset` from a mutable file. The daemon
    /// serves its last flushed state.
    fn read(&self, path: &str, offset: u64, count: usize) -> Result<Vec<u8>, ApiError>;

    /// Write bytes at `offset` with deferred flush; not durable or visible
    /// until [`StoreClient::flush`].
    fn write(&self, path: &str, offset: u64, data: &[u8], opts: WriteOpts)
        -> Result<(), ApiError>;

    /// Force buffered writes on `path` to become visible.
    fn flush(&self, path: &str) -> Result<(), ApiError>;

    /// Create a directory.
    fn mkdir(&self, path: &str) -> Result<(), ApiError>;

    /// Remove a path; directories require `recursive`.
    fn remove(&self, path: &str, recursive: bool) -> Result<(), ApiError>;

    /// Move a path within the mutable file area.
    fn mv(&self, src: &str, dst: &str) -> Result<(), ApiError>;

    /// Detailed listing of an immutable object by `/cas/...` path.
    fn list_object(&self, path: &str) -> Result<Option<Listing>, ApiError>;

    /// Read `length` bytes at `offset` of an immutable object by `/cas/...`
    /// path.
    fn cat(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, ApiError>;

    /// Resolve a mutable name to its current `/cas/...` destination.
    /// `Ok(None)` means the name is unassigned.
    fn resolve(&self, name: &str) -> Result<Option<String>, ApiError>;
}

/// Convert the daemon's explicit not-found answer into `Ok(None)`, keeping
/// every other failure an error.
pub fn not_found_as_none<T>(res: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
