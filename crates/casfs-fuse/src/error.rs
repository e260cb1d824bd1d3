//! Bridge errors and translation of daemon error text into status codes.

use casfs_api::{
    ApiError, MSG_ALREADY_EXISTS, MSG_IS_DIRECTORY_SUFFIX, MSG_NOT_A_FILE_SUFFIX, MSG_NOT_FOUND,
};
use thiserror::Error;

/// Errors surfaced by bridge operations, each mapping to one errno.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Store path or node description.
        path: String,
    },

    /// Path already exists.
    #[error("already exists: {path}")]
    AlreadyExists {
        /// Store path.
        path: String,
    },

    /// File operation hit a directory.
    #[error("is a directory: {path}")]
    IsDirectory {
        /// Store path.
        path: String,
    },

    /// Directory operation hit a non-directory.
    #[error("not a directory: {path}")]
    NotDirectory {
        /// Store path.
        path: String,
    },

    /// Operation forbidden on this node.
    #[error("permission denied: {op} on {path}")]
    PermissionDenied {
        /// Operation name.
        op: &'static str,
        /// Store path or node description.
        path: String,
    },

    /// Operation the bridge does not implement.
    #[error("unsupported operation: {op}")]
    Unsupported {
        /// Operation name.
        op: &'static str,
    },

    /// Malformed request.
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// Description of the problem.
        msg: String,
    },

    /// Transport or daemon failure with no cleaner mapping.
    #[error("store {op} failed for {path}: {source}")]
    Io {
        /// Operation name.
        op: &'static str,
        /// Store path.
        path: String,
        /// Underlying store error.
        #[source]
        source: ApiError,
    },
}

/// Bridge result alias.
pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Map to the errno replied to the kernel.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FsError::NotFound { .. } => ENOENT,
            FsError::AlreadyExists { .. } => EEXIST,
            FsError::IsDirectory { .. } => EISDIR,
            FsError::NotDirectory { .. } => ENOTDIR,
            FsError::PermissionDenied { .. } => EPERM,
            FsError::Unsupported { .. } => ENOSYS,
            FsError::InvalidArgument { .. } => EINVAL,
            FsError::Io { .. } => EIO,
        }
    }
}

/// Classify a store failure by the daemon's message text.
///
/// Known messages become their precise status; anything else is an I/O
/// failure and is the only case that gets logged.
pub fn translate_api(op: &'static str, path: &str, err: ApiError) -> FsError {
    if let ApiError::Store { message } = &err {
        if message == MSG_NOT_FOUND {
            return FsError::NotFound {
                path: path.to_string(),
            };
        }
        // a "was not a file" conflict means the path is already occupied
        // by something of another kind
        if message == MSG_ALREADY_EXISTS || message.ends_with(MSG_NOT_A_FILE_SUFFIX) {
            return FsError::AlreadyExists {
                path: path.to_string(),
            };
        }
        if message.ends_with(MSG_IS_DIRECTORY_SUFFIX) {
            return FsError::IsDirectory {
                path: path.to_string(),
            };
        }
    }
    tracing::error!(op, path, error = %err, "store call failed");
    FsError::Io {
        op,
        path: path.to_string(),
        source: err,
    }
}
