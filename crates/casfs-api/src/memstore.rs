//! In-memory store implementation for tests and development.
//!
//! Same role as an in-memory transport stub, grown into a functional fake:
//! a mutable path tree with a flushed/pending buffer split that models the
//! daemon's deferred flush, an immutable object table keyed by content hash,
//! and a name-pointer map. Every method counts its calls so tests can pin
//! down the round-trip behavior of the metadata heuristics.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::client::StoreClient;
use crate::error::{
    ApiError, MSG_ALREADY_EXISTS, MSG_IS_DIRECTORY_SUFFIX, MSG_NOT_A_FILE_SUFFIX, MSG_NOT_FOUND,
};
use crate::types::{DirEntry, EntryKind, Listing, Stat, WriteOpts};

/// Per-method remote call counters.
#[derive(Debug, Default, Clone)]
pub struct CallCounts {
    /// `stat` calls.
    pub stat: usize,
    /// Shallow `list` calls.
    pub list_shallow: usize,
    /// Detailed `list` calls.
    pub list_detailed: usize,
    /// `read` calls.
    pub read: usize,
    /// `write` calls.
    pub write: usize,
    /// `flush` calls.
    pub flush: usize,
    /// `mkdir` calls.
    pub mkdir: usize,
    /// `remove` calls.
    pub remove: usize,
    /// `mv` calls.
    pub mv: usize,
    /// `list_object` calls.
    pub list_object: usize,
    /// `cat` calls.
    pub cat: usize,
    /// `resolve` calls.
    pub resolve: usize,
}

impl CallCounts {
    /// Total remote calls across all methods.
    pub fn total(&self) -> usize {
        self.stat
            + self.list_shallow
            + self.list_detailed
            + self.read
            + self.write
            + self.flush
            + self.mkdir
            + self.remove
            + self.mv
            + self.list_object
            + self.cat
            + self.resolve
    }
}

/// One link of an immutable directory object.
#[derive(Debug, Clone)]
pub struct ObjectLink {
    /// Entry name.
    pub name: String,
    /// Hash of the linked object.
    pub hash: String,
    /// Size of the linked object.
    pub size: u64,
    /// Kind of the linked object.
    pub kind: EntryKind,
}

#[derive(Debug, Clone)]
struct Pending {
    offset: u64,
    data: Vec<u8>,
    truncate: bool,
}

#[derive(Debug, Clone, Default)]
struct MemFile {
    flushed: Vec<u8>,
    pending: Vec<Pending>,
}

#[derive(Debug, Clone)]
enum MemNode {
    Dir(BTreeMap<String, MemNode>),
    File(MemFile),
}

#[derive(Debug, Clone)]
enum Object {
    File(Vec<u8>),
    Dir(Vec<ObjectLink>),
}

struct Inner {
    root: MemNode,
    objects: HashMap<String, Object>,
    names: HashMap<String, String>,
    calls: CallCounts,
}

/// In-memory [`StoreClient`].
pub struct MemStore {
    inner: Mutex<Inner>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn content_hash(data: &[u8]) -> String {
    // FNV-1a; stable so identical content always maps to the identical hash.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in data {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("baf{h:016x}")
}

fn find<'a>(node: &'a MemNode, segs: &[&str]) -> Option<&'a MemNode> {
    let mut cur = node;
    for s in segs {
        match cur {
            MemNode::Dir(children) => cur = children.get(*s)?,
            MemNode::File(_) => return None,
        }
    }
    Some(cur)
}

fn find_mut<'a>(node: &'a mut MemNode, segs: &[&str]) -> Option<&'a mut MemNode> {
    let mut cur = node;
    for s in segs {
        match cur {
            MemNode::Dir(children) => cur = children.get_mut(*s)?,
            MemNode::File(_) => return None,
        }
    }
    Some(cur)
}

fn find_dir_mut<'a>(
    node: &'a mut MemNode,
    segs: &[&str],
) -> Option<&'a mut BTreeMap<String, MemNode>> {
    match find_mut(node, segs)? {
        MemNode::Dir(children) => Some(children),
        MemNode::File(_) => None,
    }
}

fn node_kind(node: &MemNode) -> EntryKind {
    match node {
        MemNode::Dir(_) => EntryKind::Directory,
        MemNode::File(_) => EntryKind::File,
    }
}

fn node_size(node: &MemNode) -> u64 {
    match node {
        MemNode::Dir(children) => children.len() as u64,
        MemNode::File(f) => f.flushed.len() as u64,
    }
}

fn node_hash(node: &MemNode) -> String {
    match node {
        MemNode::File(f) => content_hash(&f.flushed),
        MemNode::Dir(children) => {
            let mut acc = String::new();
            for (name, child) in children {
                acc.push_str(name);
                acc.push_str(&node_hash(child));
            }
            content_hash(acc.as_bytes())
        }
    }
}

fn slice(data: &[u8], offset: u64, count: usize) -> Vec<u8> {
    let start = (offset as usize).min(data.len());
    let end = start.saturating_add(count).min(data.len());
    data[start..end].to_vec()
}

fn apply_pending(f: &mut MemFile) {
    let pending = std::mem::take(&mut f.pending);
    for p in pending {
        if p.truncate {
            f.flushed.clear();
        }
        let off = p.offset as usize;
        let end = off + p.data.len();
        if f.flushed.len() < end {
            f.flushed.resize(end, 0);
        }
        f.flushed[off..end].copy_from_slice(&p.data);
    }
}

fn find_object<'a>(inner: &'a Inner, path: &str) -> Option<(String, &'a Object)> {
    let rest = path.strip_prefix("/cas/")?;
    let segs: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let (first, tail) = segs.split_first()?;
    let mut hash = (*first).to_string();
    let mut obj = inner.objects.get(&hash)?;
    for seg in tail {
        match obj {
            Object::Dir(links) => {
                let link = links.iter().find(|l| l.name == *seg)?;
                hash = link.hash.clone();
                obj = inner.objects.get(&hash)?;
            }
            Object::File(_) => return None,
        }
    }
    Some((hash, obj))
}

fn object_kind(obj: &Object) -> EntryKind {
    match obj {
        Object::Dir(_) => EntryKind::Directory,
        Object::File(_) => EntryKind::File,
    }
}

fn object_size(obj: &Object) -> u64 {
    match obj {
        Object::Dir(links) => links.len() as u64,
        Object::File(data) => data.len() as u64,
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Empty store: bare mutable root, no objects, no names.
    pub fn new() -> Self {
        MemStore {
            inner: Mutex::new(Inner {
                root: MemNode::Dir(BTreeMap::new()),
                objects: HashMap::new(),
                names: HashMap::new(),
                calls: CallCounts::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memstore lock poisoned")
    }

    fn ensure_dir_path<'a>(
        root: &'a mut MemNode,
        segs: &[&str],
    ) -> &'a mut BTreeMap<String, MemNode> {
        let mut cur = root;
        for s in segs {
            let children = match cur {
                MemNode::Dir(c) => c,
                MemNode::File(_) => panic!("path component {s} is a file"),
            };
            cur = children
                .entry((*s).to_string())
                .or_insert_with(|| MemNode::Dir(BTreeMap::new()));
        }
        match cur {
            MemNode::Dir(c) => c,
            MemNode::File(_) => panic!("path is a file"),
        }
    }

    /// Seed a directory (with intermediate directories) in the mutable tree.
    pub fn add_dir(&self, path: &str) {
        let mut inner = self.lock();
        Self::ensure_dir_path(&mut inner.root, &segments(path));
    }

    /// Seed a flushed file in the mutable tree.
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut inner = self.lock();
        let segs = segments(path);
        let (name, parent) = segs.split_last().expect("file path has a name");
        let dir = Self::ensure_dir_path(&mut inner.root, parent);
        dir.insert(
            (*name).to_string(),
            MemNode::File(MemFile {
                flushed: data.to_vec(),
                pending: Vec::new(),
            }),
        );
    }

    /// Seed an immutable file object; returns its content hash.
    pub fn add_object(&self, data: &[u8]) -> String {
        let mut inner = self.lock();
        let hash = content_hash(data);
        inner.objects.insert(hash.clone(), Object::File(data.to_vec()));
        hash
    }

    /// Seed an immutable directory object over previously added objects;
    /// returns its hash.
    pub fn add_object_dir(&self, links: Vec<ObjectLink>) -> String {
        let mut inner = self.lock();
        let mut acc = String::new();
        for l in &links {
            acc.push_str(&l.name);
            acc.push_str(&l.hash);
        }
        let hash = content_hash(acc.as_bytes());
        inner.objects.insert(hash.clone(), Object::Dir(links));
        hash
    }

    /// Assign a mutable name to a `/cas/...` destination.
    pub fn set_name(&self, name: &str, dest: &str) {
        let mut inner = self.lock();
        inner.names.insert(name.to_string(), dest.to_string());
    }

    /// Drop a name assignment.
    pub fn clear_name(&self, name: &str) {
        let mut inner = self.lock();
        inner.names.remove(name);
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    /// Zero the call counters.
    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Flushed content of a mutable file, if it exists.
    pub fn flushed_content(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.lock();
        match find(&inner.root, &segments(path)) {
            Some(MemNode::File(f)) => Some(f.flushed.clone()),
            _ => None,
        }
    }
}

impl StoreClient for MemStore {
    fn stat(&self, path: &str) -> Result<Option<Stat>, ApiError> {
        let mut inner = self.lock();
        inner.calls.stat += 1;
        if path.starts_with("/cas/") {
            return Ok(find_object(&inner, path).map(|(hash, obj)| Stat {
                hash,
                size: object_size(obj),
                kind: object_kind(obj),
            }));
        }
        match find(&inner.root, &segments(path)) {
            None => Ok(None),
            Some(node) => Ok(Some(Stat {
                hash: node_hash(node),
                size: node_size(node),
                kind: node_kind(node),
            })),
        }
    }

    fn list(&self, path: &str, detailed: bool) -> Result<Option<Listing>, ApiError> {
        let mut inner = self.lock();
        if detailed {
            inner.calls.list_detailed += 1;
        } else {
            inner.calls.list_shallow += 1;
        }
        let node = match find(&inner.root, &segments(path)) {
            None => return Ok(None),
            Some(n) => n,
        };
        match node {
            MemNode::File(_) => Ok(Some(Listing::not_a_directory())),
            MemNode::Dir(children) => {
                let entries = children
                    .iter()
                    .map(|(name, child)| {
                        if detailed {
                            DirEntry {
                                name: name.clone(),
                                kind: node_kind(child),
                                size: node_size(child),
                                hash: node_hash(child),
                            }
                        } else {
                            DirEntry {
                                name: name.clone(),
                                kind: EntryKind::File,
                                size: 0,
                                hash: String::new(),
                            }
                        }
                    })
                    .collect();
                Ok(Some(Listing { entries }))
            }
        }
    }

    fn read(&self, path: &str, offset: u64, count: usize) -> Result<Vec<u8>, ApiError> {
        let mut inner = self.lock();
        inner.calls.read += 1;
        match find(&inner.root, &segments(path)) {
            None => Err(ApiError::store(MSG_NOT_FOUND)),
            Some(MemNode::Dir(_)) => {
                Err(ApiError::store(format!("{path}{MSG_NOT_A_FILE_SUFFIX}")))
            }
            Some(MemNode::File(f)) => Ok(slice(&f.flushed, offset, count)),
        }
    }

    fn write(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        opts: WriteOpts,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.write += 1;
        let segs = segments(path);

        enum Found {
            File,
            Dir,
            Missing,
        }
        let found = match find(&inner.root, &segs) {
            Some(MemNode::File(_)) => Found::File,
            Some(MemNode::Dir(_)) => Found::Dir,
            None => Found::Missing,
        };

        let pending = Pending {
            offset,
            data: data.to_vec(),
            truncate: opts.truncate,
        };
        match found {
            Found::Dir => Err(ApiError::store(format!("{path}{MSG_NOT_A_FILE_SUFFIX}"))),
            Found::File => {
                if let Some(MemNode::File(f)) = find_mut(&mut inner.root, &segs) {
                    f.pending.push(pending);
                }
                Ok(())
            }
            Found::Missing => {
                if !opts.create {
                    return Err(ApiError::store(MSG_NOT_FOUND));
                }
                let Some((name, parent)) = segs.split_last() else {
                    return Err(ApiError::store(format!("{path}{MSG_NOT_A_FILE_SUFFIX}")));
                };
                match find_dir_mut(&mut inner.root, parent) {
                    None => Err(ApiError::store(MSG_NOT_FOUND)),
                    Some(children) => {
                        children.insert(
                            (*name).to_string(),
                            MemNode::File(MemFile {
                                flushed: Vec::new(),
                                pending: vec![pending],
                            }),
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    fn flush(&self, path: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.flush += 1;
        match find_mut(&mut inner.root, &segments(path)) {
            None => Err(ApiError::store(MSG_NOT_FOUND)),
            Some(MemNode::Dir(_)) => Ok(()),
            Some(MemNode::File(f)) => {
                apply_pending(f);
                Ok(())
            }
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.mkdir += 1;
        let segs = segments(path);
        let Some((name, parent)) = segs.split_last() else {
            return Err(ApiError::store(MSG_ALREADY_EXISTS));
        };
        match find_dir_mut(&mut inner.root, parent) {
            None => Err(ApiError::store(MSG_NOT_FOUND)),
            Some(children) => {
                if children.contains_key(*name) {
                    Err(ApiError::store(MSG_ALREADY_EXISTS))
                } else {
                    children.insert((*name).to_string(), MemNode::Dir(BTreeMap::new()));
                    Ok(())
                }
            }
        }
    }

    fn remove(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.remove += 1;
        let segs = segments(path);
        let Some((name, parent)) = segs.split_last() else {
            return Err(ApiError::store(MSG_NOT_FOUND));
        };
        let is_dir = match find(&inner.root, &segs) {
            None => return Err(ApiError::store(MSG_NOT_FOUND)),
            Some(MemNode::Dir(_)) => true,
            Some(MemNode::File(_)) => false,
        };
        if is_dir && !recursive {
            return Err(ApiError::store(format!("{path}{MSG_IS_DIRECTORY_SUFFIX}")));
        }
        if let Some(children) = find_dir_mut(&mut inner.root, parent) {
            children.remove(*name);
        }
        Ok(())
    }

    fn mv(&self, src: &str, dst: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.mv += 1;
        let ssegs = segments(src);
        let dsegs = segments(dst);
        let Some((sname, sparent)) = ssegs.split_last() else {
            return Err(ApiError::store(MSG_NOT_FOUND));
        };
        let Some((dname, dparent)) = dsegs.split_last() else {
            return Err(ApiError::store(MSG_NOT_FOUND));
        };
        if !matches!(find(&inner.root, dparent), Some(MemNode::Dir(_))) {
            return Err(ApiError::store(MSG_NOT_FOUND));
        }
        let node = match find_dir_mut(&mut inner.root, sparent).and_then(|c| c.remove(*sname)) {
            None => return Err(ApiError::store(MSG_NOT_FOUND)),
            Some(n) => n,
        };
        if let Some(children) = find_dir_mut(&mut inner.root, dparent) {
            children.insert((*dname).to_string(), node);
        }
        Ok(())
    }

    fn list_object(&self, path: &str) -> Result<Option<Listing>, ApiError> {
        let mut inner = self.lock();
        inner.calls.list_object += 1;
        match find_object(&inner, path) {
            None => Ok(None),
            Some((_, Object::File(_))) => Ok(Some(Listing::default())),
            Some((_, Object::Dir(links))) => Ok(Some(Listing {
                entries: links
                    .iter()
                    .map(|l| DirEntry {
                        name: l.name.clone(),
                        kind: l.kind,
                        size: l.size,
                        hash: l.hash.clone(),
                    })
                    .collect(),
            })),
        }
    }

    fn cat(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, ApiError> {
        let mut inner = self.lock();
        inner.calls.cat += 1;
        match find_object(&inner, path) {
            None => Err(ApiError::store(MSG_NOT_FOUND)),
            Some((_, Object::Dir(_))) => {
                Err(ApiError::store(format!("{path}{MSG_NOT_A_FILE_SUFFIX}")))
            }
            Some((_, Object::File(data))) => Ok(slice(data, offset, length)),
        }
    }

    fn resolve(&self, name: &str) -> Result<Option<String>, ApiError> {
        let mut inner = self.lock();
        inner.calls.resolve += 1;
        Ok(inner.names.get(name).cloned())
    }
}
