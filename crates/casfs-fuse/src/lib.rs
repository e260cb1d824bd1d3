#![warn(missing_docs)]
//! FUSE bridge over a remote content-addressable object store.
//!
//! The mount shows three addressing domains as one hierarchy: the store's
//! mutable file area at the root, immutable objects under `/cas/<hash>`,
//! and mutable name pointers under `/names/<name>` as symlinks into the
//! hash area.

pub mod attr;
pub mod config;
pub mod error;
pub mod fastmeta;
pub mod filesystem;
pub mod immutable;
pub mod mount;
pub mod mutable;
pub mod names;
pub mod node;
pub mod openfile;
pub mod sync;
pub mod xattr;

pub use config::FsConfig;
pub use error::{FsError, Result};
pub use filesystem::CasFilesystem;
pub use mount::{options_to_fuser, parse_mount_options, validate_mountpoint, MountOptions};
