//! The single extended attribute the bridge exposes.

/// Extended attribute carrying a node's content hash.
pub const HASH_XATTR: &str = "user.cas-hash";

/// `listxattr` payload: the one attribute name, NUL-terminated.
pub fn name_list() -> Vec<u8> {
    let mut bytes = HASH_XATTR.as_bytes().to_vec();
    bytes.push(0);
    bytes
}
