#![warn(missing_docs)]

//! Client for the CASFS store daemon.
//!
//! Exposes the remote surface the FUSE bridge consumes: stat/list/read/write
//! with deferred flush on the mutable file area, detailed listings and content
//! reads on the immutable object area, and name-pointer resolution. Two
//! implementations are provided: [`HttpStore`] speaks the daemon's HTTP RPC
//! convention, [`MemStore`] is an in-memory store for tests and development.

pub mod client;
pub mod error;
pub mod http;
pub mod memstore;
pub mod types;

pub use client::{not_found_as_none, StoreClient};
pub use error::{
    ApiError, MSG_ALREADY_EXISTS, MSG_IS_DIRECTORY_SUFFIX, MSG_NOT_A_FILE_SUFFIX, MSG_NOT_FOUND,
};
pub use http::{HttpConfig, HttpStore};
pub use memstore::{CallCounts, MemStore, ObjectLink};
pub use types::{DirEntry, EntryKind, Listing, Stat, WriteOpts};
