//! Store client errors and the daemon's textual error vocabulary.

use thiserror::Error;

/// Daemon message for a missing path, name, or object.
pub const MSG_NOT_FOUND: &str = "file does not exist";

/// Daemon message for a conflicting mkdir or create.
pub const MSG_ALREADY_EXISTS: &str = "file already exists";

/// Suffix of the daemon message for a non-recursive remove of a directory.
pub const MSG_IS_DIRECTORY_SUFFIX: &str = " is a directory, use -r to remove directories";

/// Suffix of the daemon message for a file operation on a non-file.
pub const MSG_NOT_A_FILE_SUFFIX: &str = " was not a file";

/// Errors surfaced by a [`crate::StoreClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The daemon answered with an error body.
    #[error("store error: {message}")]
    Store {
        /// The daemon's textual error message, matched verbatim by the
        /// bridge's error translation.
        message: String,
    },

    /// The HTTP transport failed before a daemon answer arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The daemon answered with a body that did not decode.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build a daemon-message error.
    pub fn store(message: impl Into<String>) -> Self {
        ApiError::Store {
            message: message.into(),
        }
    }

    /// True when the daemon explicitly reported the path as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Store { message } if message == MSG_NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(ApiError::store(MSG_NOT_FOUND).is_not_found());
        assert!(!ApiError::store(MSG_ALREADY_EXISTS).is_not_found());
        assert!(!ApiError::store("something else").is_not_found());
    }

    #[test]
    fn test_display_carries_message() {
        let err = ApiError::store("boom");
        assert_eq!(err.to_string(), "store error: boom");
    }
}
