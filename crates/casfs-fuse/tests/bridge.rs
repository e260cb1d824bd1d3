//! End-to-end bridge behavior over the in-memory store.

use std::sync::Arc;

use casfs_api::{EntryKind, MemStore, ObjectLink, StoreClient};
use casfs_fuse::error::FsError;
use casfs_fuse::immutable::ImmutableTree;
use casfs_fuse::mutable::MutableTree;
use casfs_fuse::names::{link_target, NameTree};
use casfs_fuse::node::{Backing, NodeTable, HASH_ANCHOR, NAME_ANCHOR, ROOT_NODE};

fn store() -> Arc<MemStore> {
    Arc::new(MemStore::new())
}

fn mutable(store: &Arc<MemStore>) -> MutableTree {
    MutableTree::new(store.clone() as Arc<dyn StoreClient>, 100)
}

#[test]
fn test_walk_and_read_mutable_tree() {
    let store = store();
    store.add_file("/docs/readme.txt", b"hello casfs");
    let tree = mutable(&store);
    let mut nodes = NodeTable::new();

    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    let docs = nodes.child(ROOT_NODE, "docs").unwrap().id;
    tree.open_dir(&mut nodes, docs).unwrap();
    let file = nodes.child(docs, "readme.txt").unwrap();
    assert_eq!(file.size, 11);

    let path = file.mutable_path().unwrap().to_string();
    assert_eq!(path, "/docs/readme.txt");
    assert_eq!(tree.read(&path, 0, 64).unwrap(), b"hello casfs");
    assert_eq!(tree.read(&path, 6, 64).unwrap(), b"casfs");
}

#[test]
fn test_open_dir_is_idempotent_for_identity() {
    let store = store();
    store.add_file("/a", b"1");
    store.add_dir("/d");
    let tree = mutable(&store);
    let mut nodes = NodeTable::new();

    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    let a = nodes.child(ROOT_NODE, "a").unwrap().id;
    let d = nodes.child(ROOT_NODE, "d").unwrap().id;

    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    assert_eq!(nodes.child(ROOT_NODE, "a").unwrap().id, a);
    assert_eq!(nodes.child(ROOT_NODE, "d").unwrap().id, d);
}

#[test]
fn test_backend_deletion_visible_after_open_dir() {
    let store = store();
    store.add_file("/gone", b"x");
    let tree = mutable(&store);
    let mut nodes = NodeTable::new();

    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    assert!(nodes.child(ROOT_NODE, "gone").is_some());

    store.remove("/gone", false).unwrap();
    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    assert!(nodes.child(ROOT_NODE, "gone").is_none());
    // anchors are untouched by reconciliation
    assert!(nodes.child(ROOT_NODE, HASH_ANCHOR).is_some());
    assert!(nodes.child(ROOT_NODE, NAME_ANCHOR).is_some());
}

#[test]
fn test_listing_cost_below_and_above_threshold() {
    let store = store();
    for i in 0..6 {
        store.add_dir(&format!("/big/d{i}"));
    }

    // below the threshold: one shallow listing plus one probe per entry
    let small = MutableTree::new(store.clone() as Arc<dyn StoreClient>, 100);
    let mut nodes = NodeTable::new();
    small.open_dir(&mut nodes, ROOT_NODE).unwrap();
    let big = nodes.child(ROOT_NODE, "big").unwrap().id;
    store.reset_calls();
    small.open_dir(&mut nodes, big).unwrap();
    let calls = store.calls();
    assert_eq!(calls.list_shallow, 7);
    assert_eq!(calls.list_detailed, 0);
    assert_eq!(calls.total(), 7);

    // above the threshold: the probe plus a single detailed listing
    let bulk = MutableTree::new(store.clone() as Arc<dyn StoreClient>, 3);
    store.reset_calls();
    bulk.open_dir(&mut nodes, big).unwrap();
    let calls = store.calls();
    assert_eq!(calls.list_shallow, 1);
    assert_eq!(calls.list_detailed, 1);
    assert_eq!(calls.total(), 2);

    // both paths agree on the result
    for i in 0..6 {
        let child = nodes.child(big, &format!("d{i}")).unwrap();
        assert!(child.is_dir());
    }
}

#[test]
fn test_deferred_flush_round_trip() {
    let store = store();
    let tree = mutable(&store);

    tree.create("/log").unwrap();
    tree.write("/log", 0, b"first ").unwrap();
    tree.write("/log", 6, b"second").unwrap();
    assert!(tree.read("/log", 0, 64).unwrap().is_empty());

    tree.flush("/log").unwrap();
    assert_eq!(tree.read("/log", 0, 64).unwrap(), b"first second");
    assert_eq!(store.flushed_content("/log").unwrap(), b"first second");
}

#[test]
fn test_immutable_object_walk_and_read() {
    let store = store();
    let blob = store.add_object(b"object bytes");
    let dir = store.add_object_dir(vec![ObjectLink {
        name: "data.bin".to_string(),
        hash: blob.clone(),
        size: 12,
        kind: EntryKind::File,
    }]);

    let tree = ImmutableTree::new(store.clone() as Arc<dyn StoreClient>);
    let mut nodes = NodeTable::new();
    let anchor = nodes.child(ROOT_NODE, HASH_ANCHOR).unwrap().id;

    let dir_id = tree.lookup(&mut nodes, anchor, &dir).unwrap();
    tree.open_dir(&mut nodes, dir_id).unwrap();
    let entries = tree.entries(&nodes, dir_id).unwrap().to_vec();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "data.bin");

    let file_id = tree.lookup(&mut nodes, dir_id, "data.bin").unwrap();
    let node = nodes.get(file_id).unwrap();
    assert_eq!(node.hash.as_deref(), Some(blob.as_str()));

    let hash_path = format!("{dir}/data.bin");
    assert_eq!(tree.read(&hash_path, 0, 64).unwrap(), b"object bytes");
    assert_eq!(tree.read(&hash_path, 7, 64).unwrap(), b"bytes");
}

#[test]
fn test_immutable_listing_never_refetched() {
    let store = store();
    let blob = store.add_object(b"x");
    let dir = store.add_object_dir(vec![ObjectLink {
        name: "f".to_string(),
        hash: blob,
        size: 1,
        kind: EntryKind::File,
    }]);

    let tree = ImmutableTree::new(store.clone() as Arc<dyn StoreClient>);
    let mut nodes = NodeTable::new();
    let anchor = nodes.child(ROOT_NODE, HASH_ANCHOR).unwrap().id;

    let dir_id = tree.lookup(&mut nodes, anchor, &dir).unwrap();
    for _ in 0..3 {
        tree.open_dir(&mut nodes, dir_id).unwrap();
    }
    assert_eq!(store.calls().list_object, 1);

    // repeated lookups of a cached object cost nothing
    store.reset_calls();
    let again = tree.lookup(&mut nodes, anchor, &dir).unwrap();
    assert_eq!(again, dir_id);
    assert_eq!(store.calls().total(), 0);
}

#[test]
fn test_name_to_object_flow() {
    let store = store();
    let blob = store.add_object(b"published");
    store.set_name("release", &format!("/cas/{blob}"));

    let names = NameTree::new(store.clone() as Arc<dyn StoreClient>);
    let objects = ImmutableTree::new(store.clone() as Arc<dyn StoreClient>);
    let mut nodes = NodeTable::new();
    let name_anchor = nodes.child(ROOT_NODE, NAME_ANCHOR).unwrap().id;
    let hash_anchor = nodes.child(ROOT_NODE, HASH_ANCHOR).unwrap().id;

    let link = names.lookup(&mut nodes, name_anchor, "release").unwrap();
    let dest = match &nodes.get(link).unwrap().backing {
        Backing::NameLink { dest } => dest.clone(),
        other => panic!("unexpected backing: {other:?}"),
    };
    assert_eq!(link_target(&dest), format!("../cas/{blob}"));

    // following the link lands on the immutable object
    let hash = dest.strip_prefix("/cas/").unwrap();
    let obj = objects.lookup(&mut nodes, hash_anchor, hash).unwrap();
    assert_eq!(objects.read(hash, 0, 64).unwrap(), b"published");
    assert_eq!(nodes.get(obj).unwrap().hash.as_deref(), Some(hash));
}

#[test]
fn test_republished_name_tracks_new_destination() {
    let store = store();
    let old = store.add_object(b"v1");
    let new = store.add_object(b"v2");
    store.set_name("site", &format!("/cas/{old}"));

    let names = NameTree::new(store.clone() as Arc<dyn StoreClient>);
    let mut nodes = NodeTable::new();
    let anchor = nodes.child(ROOT_NODE, NAME_ANCHOR).unwrap().id;

    let first = names.lookup(&mut nodes, anchor, "site").unwrap();
    store.set_name("site", &format!("/cas/{new}"));
    let second = names.lookup(&mut nodes, anchor, "site").unwrap();

    assert_ne!(first, second);
    match &nodes.get(second).unwrap().backing {
        Backing::NameLink { dest } => assert_eq!(dest, &format!("/cas/{new}")),
        other => panic!("unexpected backing: {other:?}"),
    }
}

#[test]
fn test_mutable_errors_translate_precisely() {
    let store = store();
    store.add_dir("/d");
    store.add_file("/d/f", b"x");
    let tree = mutable(&store);
    let mut nodes = NodeTable::new();

    let err = tree.lookup(&mut nodes, ROOT_NODE, "missing").unwrap_err();
    assert!(matches!(err, FsError::NotFound { .. }));

    let err = tree.mkdir("/d").unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));

    let err = tree.remove("/d", false).unwrap_err();
    assert!(matches!(err, FsError::IsDirectory { .. }));

    // reading a directory surfaces the daemon's kind-conflict message
    let err = tree.read("/d", 0, 16).unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));
}

#[test]
fn test_rename_then_reconcile() {
    let store = store();
    store.add_file("/old", b"content");
    let tree = mutable(&store);
    let mut nodes = NodeTable::new();

    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    assert!(nodes.child(ROOT_NODE, "old").is_some());

    tree.rename("/old", "/new").unwrap();
    tree.open_dir(&mut nodes, ROOT_NODE).unwrap();
    assert!(nodes.child(ROOT_NODE, "old").is_none());
    let renamed = nodes.child(ROOT_NODE, "new").unwrap();
    assert_eq!(renamed.size, 7);
}
