//! The FUSE bridge: dispatches kernel operations to the three addressing
//! domains and keeps the cached node hierarchy in sync.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use fuser::{
    FileType as FuserFileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use tracing::debug;

use casfs_api::StoreClient;

use crate::attr::{anchor_attr, fuser_kind, node_attr, TTL};
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::immutable::ImmutableTree;
use crate::mutable::MutableTree;
use crate::names::{link_target, NameTree};
use crate::node::{join_path, Backing, NodeId, NodeKind, NodeTable, ROOT_NODE};
use crate::openfile::OpenFileTable;
use crate::xattr::{name_list, HASH_XATTR};

/// Inode reported for directory entries the kernel has not looked up yet.
const UNKNOWN_INO: u64 = 0xffffffff;

/// The tail of a directory listing starting at `offset`, dot entries
/// included. Each entry carries the offset the kernel resumes from after
/// consuming it, so a follow-up call continues exactly past the last entry
/// of the previous batch and an exhausted walk yields an empty page.
fn readdir_page<'a>(
    ino: u64,
    parent: NodeId,
    entries: &'a [(u64, FuserFileType, String)],
    offset: i64,
) -> Vec<(u64, i64, FuserFileType, &'a str)> {
    let mut page = Vec::new();
    if offset < 1 {
        page.push((ino, 1, FuserFileType::Directory, "."));
    }
    if offset < 2 {
        page.push((parent, 2, FuserFileType::Directory, ".."));
    }
    let skip = (offset - 2).max(0) as usize;
    for (pos, (child_ino, kind, name)) in entries.iter().enumerate().skip(skip) {
        page.push((*child_ino, pos as i64 + 3, *kind, name.as_str()));
    }
    page
}

struct BridgeState {
    nodes: NodeTable,
    files: OpenFileTable,
}

/// The bridge filesystem handed to `fuser::mount2`.
pub struct CasFilesystem {
    config: FsConfig,
    mutable: MutableTree,
    immutable: ImmutableTree,
    names: NameTree,
    state: Arc<Mutex<BridgeState>>,
}

enum Domain {
    Mutable,
    HashAnchor,
    NameAnchor,
    Object,
    Link,
}

fn domain(backing: &Backing) -> Domain {
    match backing {
        Backing::Mutable { .. } => Domain::Mutable,
        Backing::HashAnchor => Domain::HashAnchor,
        Backing::NameAnchor => Domain::NameAnchor,
        Backing::Immutable { .. } => Domain::Object,
        Backing::NameLink { .. } => Domain::Link,
    }
}

impl CasFilesystem {
    /// Bridge over `client` with the given settings.
    pub fn new(client: Arc<dyn StoreClient>, config: FsConfig) -> Self {
        let state = BridgeState {
            nodes: NodeTable::new(),
            files: OpenFileTable::new(),
        };
        CasFilesystem {
            mutable: MutableTree::new(client.clone(), config.fast_list_threshold),
            immutable: ImmutableTree::new(client.clone()),
            names: NameTree::new(client),
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// The bridge settings.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn attr_of(&self, nodes: &NodeTable, id: NodeId) -> Result<(fuser::FileAttr, u64)> {
        let node = nodes.get(id).ok_or_else(|| FsError::NotFound {
            path: format!("inode {id}"),
        })?;
        let attr = if node.backing.is_anchor() {
            anchor_attr(node, self.config.uid, self.config.gid)
        } else {
            node_attr(node, self.config.uid, self.config.gid)
        };
        Ok((attr, node.generation))
    }

    fn require_mutable_dir(
        &self,
        nodes: &NodeTable,
        dir: NodeId,
        op: &'static str,
    ) -> Result<String> {
        let node = nodes.get(dir).ok_or_else(|| FsError::NotFound {
            path: format!("inode {dir}"),
        })?;
        node.mutable_path()
            .map(str::to_string)
            .ok_or_else(|| FsError::PermissionDenied {
                op,
                path: node.name.clone(),
            })
    }

    fn do_lookup(
        &self,
        state: &mut BridgeState,
        parent: NodeId,
        name: &str,
    ) -> Result<(fuser::FileAttr, u64)> {
        // The anchors are fixed; never ask the store about them.
        if parent == ROOT_NODE {
            if let Some(child) = state.nodes.child(parent, name) {
                if child.backing.is_anchor() {
                    let id = child.id;
                    return self.attr_of(&state.nodes, id);
                }
            }
        }

        let parent_domain = match state.nodes.get(parent) {
            None => {
                return Err(FsError::NotFound {
                    path: format!("inode {parent}"),
                })
            }
            Some(node) => domain(&node.backing),
        };
        let id = match parent_domain {
            Domain::Mutable => self.mutable.lookup(&mut state.nodes, parent, name)?,
            Domain::HashAnchor | Domain::Object => {
                self.immutable.lookup(&mut state.nodes, parent, name)?
            }
            Domain::NameAnchor => self.names.lookup(&mut state.nodes, parent, name)?,
            Domain::Link => {
                return Err(FsError::NotDirectory {
                    path: name.to_string(),
                })
            }
        };
        self.attr_of(&state.nodes, id)
    }

    fn do_getattr(&self, state: &mut BridgeState, ino: NodeId) -> Result<fuser::FileAttr> {
        let refresh = match state.nodes.get(ino) {
            None => {
                return Err(FsError::NotFound {
                    path: format!("inode {ino}"),
                })
            }
            Some(node) => node.mutable_path().map(str::to_string),
        };
        if let Some(path) = refresh {
            match self.mutable.getattr(&path) {
                Ok(stat) => {
                    if let Some(node) = state.nodes.get_mut(ino) {
                        node.size = stat.size;
                        if !stat.hash.is_empty() {
                            node.hash = Some(stat.hash);
                        }
                    }
                }
                Err(err @ FsError::NotFound { .. }) => {
                    if ino != ROOT_NODE {
                        let evict = state
                            .nodes
                            .get(ino)
                            .map(|n| (n.parent, n.name.clone()));
                        if let Some((parent, name)) = evict {
                            state.nodes.remove_child(parent, &name);
                        }
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.attr_of(&state.nodes, ino)?.0)
    }

    fn do_create_file(
        &self,
        state: &mut BridgeState,
        parent: NodeId,
        name: &str,
    ) -> Result<NodeId> {
        let dir_path = self.require_mutable_dir(&state.nodes, parent, "create")?;
        let path = join_path(&dir_path, name);
        self.mutable.create(&path)?;
        Ok(state
            .nodes
            .alloc(parent, name, NodeKind::File, Backing::Mutable { path }))
    }

    fn do_mkdir(&self, state: &mut BridgeState, parent: NodeId, name: &str) -> Result<NodeId> {
        let dir_path = self.require_mutable_dir(&state.nodes, parent, "mkdir")?;
        let path = join_path(&dir_path, name);
        self.mutable.mkdir(&path)?;
        Ok(state
            .nodes
            .alloc(parent, name, NodeKind::Directory, Backing::Mutable { path }))
    }

    fn do_remove(
        &self,
        state: &mut BridgeState,
        parent: NodeId,
        name: &str,
        recursive: bool,
    ) -> Result<()> {
        let dir_path = self.require_mutable_dir(&state.nodes, parent, "remove")?;
        let path = join_path(&dir_path, name);
        match self.mutable.remove(&path, recursive) {
            Ok(()) => {
                state.nodes.remove_child(parent, name);
                Ok(())
            }
            Err(err @ FsError::NotFound { .. }) => {
                // the store is authoritative; drop the stale cache entry too
                state.nodes.remove_child(parent, name);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn do_rename(
        &self,
        state: &mut BridgeState,
        parent: NodeId,
        name: &str,
        newparent: NodeId,
        newname: &str,
    ) -> Result<()> {
        let src_dir = self.require_mutable_dir(&state.nodes, parent, "rename")?;
        let dst_dir = self.require_mutable_dir(&state.nodes, newparent, "rename")?;
        let src = join_path(&src_dir, name);
        let dst = join_path(&dst_dir, newname);
        self.mutable.rename(&src, &dst)?;
        state.nodes.remove_child(newparent, newname);
        state.nodes.remove_child(parent, name);
        Ok(())
    }

    fn do_open_dir(&self, state: &mut BridgeState, ino: NodeId) -> Result<()> {
        let dom = match state.nodes.get(ino) {
            None => {
                return Err(FsError::NotFound {
                    path: format!("inode {ino}"),
                })
            }
            Some(node) if !node.is_dir() => {
                return Err(FsError::NotDirectory {
                    path: node.name.clone(),
                })
            }
            Some(node) => domain(&node.backing),
        };
        match dom {
            // the anchors hold unbounded namespaces and refuse enumeration
            Domain::HashAnchor | Domain::NameAnchor => Err(FsError::PermissionDenied {
                op: "opendir",
                path: format!("inode {ino}"),
            }),
            Domain::Mutable => self.mutable.open_dir(&mut state.nodes, ino),
            Domain::Object => self.immutable.open_dir(&mut state.nodes, ino),
            Domain::Link => Err(FsError::NotDirectory {
                path: format!("inode {ino}"),
            }),
        }
    }

    fn dir_entries(
        &self,
        state: &BridgeState,
        ino: NodeId,
    ) -> Result<Vec<(u64, FuserFileType, String)>> {
        let node = state.nodes.get(ino).ok_or_else(|| FsError::NotFound {
            path: format!("inode {ino}"),
        })?;
        if !node.is_dir() {
            return Err(FsError::NotDirectory {
                path: node.name.clone(),
            });
        }

        if let Backing::Immutable {
            entries: Some(entries),
            ..
        } = &node.backing
        {
            return Ok(entries
                .iter()
                .map(|e| {
                    let child_ino = node
                        .children
                        .get(&e.name)
                        .copied()
                        .unwrap_or(UNKNOWN_INO);
                    (child_ino, fuser_kind(NodeKind::from(e.kind)), e.name.clone())
                })
                .collect());
        }

        let mut names: Vec<&String> = node.children.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .filter_map(|name| {
                let child = state.nodes.child(ino, name)?;
                Some((child.id, fuser_kind(child.kind), name.clone()))
            })
            .collect())
    }

    fn do_read(
        &self,
        state: &BridgeState,
        ino: NodeId,
        offset: u64,
        size: usize,
    ) -> Result<Vec<u8>> {
        let node = state.nodes.get(ino).ok_or_else(|| FsError::NotFound {
            path: format!("inode {ino}"),
        })?;
        match &node.backing {
            Backing::Mutable { path } => self.mutable.read(path, offset, size),
            Backing::Immutable { hash_path, .. } => self.immutable.read(hash_path, offset, size),
            _ => Err(FsError::InvalidArgument {
                msg: format!("read on inode {ino}"),
            }),
        }
    }

    fn do_write(
        &self,
        state: &mut BridgeState,
        ino: NodeId,
        fh: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<u32> {
        let path = match state.nodes.get(ino) {
            None => {
                return Err(FsError::NotFound {
                    path: format!("inode {ino}"),
                })
            }
            Some(node) => match node.mutable_path() {
                Some(p) => p.to_string(),
                None => {
                    return Err(FsError::PermissionDenied {
                        op: "write",
                        path: node.name.clone(),
                    })
                }
            },
        };
        self.mutable.write(&path, offset, data)?;
        if let Some(file) = state.files.get_mut(fh) {
            file.on_write();
        }
        Ok(data.len() as u32)
    }

    fn do_flush(&self, state: &mut BridgeState, fh: u64) -> Result<()> {
        let (node, owed) = match state.files.get(fh) {
            None => return Ok(()),
            Some(file) => (file.node, file.needs_flush()),
        };
        if !owed {
            return Ok(());
        }
        let path = state
            .nodes
            .get(node)
            .and_then(|n| n.mutable_path().map(str::to_string));
        if let Some(path) = path {
            self.mutable.flush(&path)?;
        }
        if let Some(file) = state.files.get_mut(fh) {
            file.on_flush();
        }
        Ok(())
    }

    fn do_getxattr(&self, state: &BridgeState, ino: NodeId, name: &str) -> Result<Option<Vec<u8>>> {
        let node = state.nodes.get(ino).ok_or_else(|| FsError::NotFound {
            path: format!("inode {ino}"),
        })?;
        if name != HASH_XATTR {
            return Ok(None);
        }
        let hash = match &node.backing {
            Backing::Mutable { path } => self.mutable.hash_of(path)?,
            _ => node.hash.clone(),
        };
        Ok(hash.map(String::into_bytes))
    }
}

fn reply_xattr_bytes(data: &[u8], size: u32, reply: ReplyXattr) {
    if size == 0 {
        reply.size(data.len() as u32);
    } else if (size as usize) < data.len() {
        reply.error(libc::ERANGE);
    } else {
        reply.data(data);
    }
}

impl Filesystem for CasFilesystem {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        debug!("bridge init");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        debug!("lookup parent={} name={}", parent, name);

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_lookup(&mut state, parent, name) {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr ino={}", ino);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_getattr(&mut state, ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr ino={} size={:?} mode={:?}", ino, size, mode);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        if let Some(new_size) = size {
            let path = match state.nodes.get(ino) {
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
                Some(node) => match node.mutable_path() {
                    Some(p) => p.to_string(),
                    None => {
                        reply.error(libc::EPERM);
                        return;
                    }
                },
            };
            if let Err(err) = self.mutable.truncate(&path, new_size) {
                reply.error(err.to_errno());
                return;
            }
            if let Some(node) = state.nodes.get_mut(ino) {
                node.size = 0;
            }
        }

        // mode, ownership and timestamp changes are accepted and dropped
        match self.attr_of(&state.nodes, ino) {
            Ok((attr, _)) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        debug!("readlink ino={}", ino);
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match state.nodes.get(ino).map(|n| &n.backing) {
            Some(Backing::NameLink { dest }) => reply.data(link_target(dest).as_bytes()),
            Some(_) => reply.error(libc::EINVAL),
            None => reply.error(libc::ENOENT),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!("mknod parent={} name={} mode={:o} rdev={}", parent, name, mode, rdev);

        if rdev != 0 {
            reply.error(libc::ENODEV);
            return;
        }

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        let file_type = mode & libc::S_IFMT;
        let result = if file_type == libc::S_IFDIR {
            self.do_mkdir(&mut state, parent, name)
        } else if file_type == libc::S_IFREG || file_type == 0 {
            self.do_create_file(&mut state, parent, name)
        } else {
            reply.error(libc::EINVAL);
            return;
        };

        match result.and_then(|id| self.attr_of(&state.nodes, id)) {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!("mkdir parent={} name={} mode={:o}", parent, name, mode);

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self
            .do_mkdir(&mut state, parent, name)
            .and_then(|id| self.attr_of(&state.nodes, id))
        {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        debug!("unlink parent={} name={}", parent, name);

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_remove(&mut state, parent, name, false) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        debug!("rmdir parent={} name={}", parent, name);

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_remove(&mut state, parent, name, true) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (name.to_str(), newname.to_str()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        debug!(
            "rename parent={} name={} newparent={} newname={}",
            parent, name, newparent, newname
        );

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_rename(&mut state, parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open ino={} flags={:#x}", ino, flags);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        let (read_only, is_dir) = match state.nodes.get(ino) {
            None => {
                reply.error(libc::ENOENT);
                return;
            }
            Some(node) => (node.backing.is_read_only(), node.is_dir()),
        };
        if is_dir {
            reply.error(libc::EISDIR);
            return;
        }
        let wants_write = flags & libc::O_ACCMODE != libc::O_RDONLY;
        if wants_write && read_only {
            reply.error(libc::EPERM);
            return;
        }

        let fh = state.files.open(ino, !wants_write);
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read ino={} offset={} size={}", ino, offset, size);
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_read(&state, ino, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write ino={} offset={} len={}", ino, offset, data.len());
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_write(&mut state, ino, fh, offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush ino={} fh={}", ino, fh);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_flush(&mut state, fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        debug!("fsync ino={} fh={}", ino, fh);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_flush(&mut state, fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release ino={} fh={}", ino, fh);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        if let Err(err) = self.do_flush(&mut state, fh) {
            debug!("flush on release failed: {}", err);
        }
        state.files.close(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir ino={}", ino);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_open_dir(&mut state, ino) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        let parent = match state.nodes.get(ino) {
            Some(node) => node.parent,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let entries = match self.dir_entries(&state, ino) {
            Ok(e) => e,
            Err(err) => {
                reply.error(err.to_errno());
                return;
            }
        };

        // a full reply buffer ends the batch; the kernel resumes from the
        // last added entry's offset
        for (entry_ino, next_offset, kind, name) in readdir_page(ino, parent, &entries, offset) {
            if reply.add(entry_ino, next_offset, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!("releasedir");
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs");
        reply.statfs(
            1024 * 1024 * 256,
            1024 * 1024 * 230,
            1024 * 1024 * 230,
            1_000_000,
            999_000,
            4096,
            255,
            4096,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr ino={} name={:?}", ino, name);
        reply.error(libc::EPERM);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENODATA);
                return;
            }
        };
        debug!("getxattr ino={} name={}", ino, name);

        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        match self.do_getxattr(&state, ino, name) {
            Ok(Some(data)) => reply_xattr_bytes(&data, size, reply),
            Ok(None) => reply.error(libc::ENODATA),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr ino={}", ino);
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        let node = match state.nodes.get(ino) {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let data = if node.backing.is_anchor() {
            Vec::new()
        } else {
            name_list()
        };
        reply_xattr_bytes(&data, size, reply);
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr ino={} name={:?}", ino, name);
        reply.error(libc::EPERM);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!("create parent={} name={} mode={:o}", parent, name, mode);

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };

        let id = match self.do_create_file(&mut state, parent, name) {
            Ok(id) => id,
            Err(err) => {
                reply.error(err.to_errno());
                return;
            }
        };
        let fh = state.files.open(id, false);
        match self.attr_of(&state.nodes, id) {
            Ok((attr, generation)) => reply.created(&TTL, &attr, generation, fh, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casfs_api::MemStore;
    use crate::node::{HASH_ANCHOR, NAME_ANCHOR};

    fn bridge(store: &Arc<MemStore>) -> CasFilesystem {
        CasFilesystem::new(store.clone() as Arc<dyn StoreClient>, FsConfig::default())
    }

    #[test]
    fn test_lookup_anchor_answers_locally() {
        let store = Arc::new(MemStore::new());
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        store.reset_calls();
        let (attr, _) = fs.do_lookup(&mut state, ROOT_NODE, HASH_ANCHOR).unwrap();
        assert_eq!(attr.kind, FuserFileType::Directory);
        assert_eq!(attr.perm, 0o111);
        assert_eq!(store.calls().total(), 0);
    }

    #[test]
    fn test_lookup_mutable_file() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"hello");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        let (attr, _) = fs.do_lookup(&mut state, ROOT_NODE, "f").unwrap();
        assert_eq!(attr.kind, FuserFileType::RegularFile);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.perm, 0o644);
    }

    #[test]
    fn test_create_under_anchor_is_denied() {
        let store = Arc::new(MemStore::new());
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        let anchor = state.nodes.child(ROOT_NODE, NAME_ANCHOR).unwrap().id;
        let err = fs.do_create_file(&mut state, anchor, "x").unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_mkdir_conflict_leaves_cache_alone() {
        let store = Arc::new(MemStore::new());
        store.add_dir("/d");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "d").unwrap();
        let cached = state.nodes.child(ROOT_NODE, "d").unwrap().id;

        let err = fs.do_mkdir(&mut state, ROOT_NODE, "d").unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
        assert_eq!(state.nodes.child(ROOT_NODE, "d").unwrap().id, cached);
    }

    #[test]
    fn test_remove_missing_evicts_stale_cache() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"x");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "f").unwrap();
        store.remove("/f", false).unwrap();

        let err = fs.do_remove(&mut state, ROOT_NODE, "f", false).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(state.nodes.child(ROOT_NODE, "f").is_none());
    }

    #[test]
    fn test_rename_into_anchor_is_denied() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"x");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        let anchor = state.nodes.child(ROOT_NODE, HASH_ANCHOR).unwrap().id;
        let err = fs
            .do_rename(&mut state, ROOT_NODE, "f", anchor, "f")
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_rename_moves_store_path_and_drops_cache() {
        let store = Arc::new(MemStore::new());
        store.add_file("/a", b"data");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "a").unwrap();
        fs.do_rename(&mut state, ROOT_NODE, "a", ROOT_NODE, "b").unwrap();
        assert!(state.nodes.child(ROOT_NODE, "a").is_none());
        assert!(store.stat("/a").unwrap().is_none());
        assert!(store.stat("/b").unwrap().is_some());
    }

    #[test]
    fn test_opendir_anchor_is_denied() {
        let store = Arc::new(MemStore::new());
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        let anchor = state.nodes.child(ROOT_NODE, HASH_ANCHOR).unwrap().id;
        let err = fs.do_open_dir(&mut state, anchor).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_root_opendir_reconciles_children() {
        let store = Arc::new(MemStore::new());
        store.add_file("/a", b"1");
        store.add_dir("/d");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_open_dir(&mut state, ROOT_NODE).unwrap();
        let root = state.nodes.get(ROOT_NODE).unwrap();
        // two backend entries plus the two anchors
        assert_eq!(root.children.len(), 4);
        assert!(state.nodes.child(ROOT_NODE, HASH_ANCHOR).is_some());
        assert!(state.nodes.child(ROOT_NODE, "a").is_some());
    }

    #[test]
    fn test_write_flush_read_through_bridge() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "f").unwrap();
        let ino = state.nodes.child(ROOT_NODE, "f").unwrap().id;
        let fh = state.files.open(ino, false);

        fs.do_write(&mut state, ino, fh, 0, b"payload").unwrap();
        // not visible until flushed
        assert!(fs.do_read(&state, ino, 0, 64).unwrap().is_empty());
        fs.do_flush(&mut state, fh).unwrap();
        assert_eq!(fs.do_read(&state, ino, 0, 64).unwrap(), b"payload");
        // flush with nothing owed is a no-op
        store.reset_calls();
        fs.do_flush(&mut state, fh).unwrap();
        assert_eq!(store.calls().flush, 0);
    }

    #[test]
    fn test_getxattr_reports_content_hash() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"data");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "f").unwrap();
        let ino = state.nodes.child(ROOT_NODE, "f").unwrap().id;

        let hash = fs.do_getxattr(&state, ino, HASH_XATTR).unwrap().unwrap();
        let expected = store.stat("/f").unwrap().unwrap().hash;
        assert_eq!(hash, expected.into_bytes());

        assert!(fs.do_getxattr(&state, ino, "user.other").unwrap().is_none());
    }

    #[test]
    fn test_getattr_refreshes_mutable_size() {
        let store = Arc::new(MemStore::new());
        store.add_file("/f", b"ab");
        let fs = bridge(&store);
        let mut state = fs.state.lock().unwrap();

        fs.do_lookup(&mut state, ROOT_NODE, "f").unwrap();
        let ino = state.nodes.child(ROOT_NODE, "f").unwrap().id;
        store.add_file("/f", b"abcdef");

        let attr = fs.do_getattr(&mut state, ino).unwrap();
        assert_eq!(attr.size, 6);
    }

    fn listing(n: u64) -> Vec<(u64, FuserFileType, String)> {
        (0..n)
            .map(|i| (100 + i, FuserFileType::RegularFile, format!("f{i}")))
            .collect()
    }

    #[test]
    fn test_readdir_page_emits_dots_then_children() {
        let entries = listing(3);
        let page = readdir_page(5, ROOT_NODE, &entries, 0);
        let names: Vec<&str> = page.iter().map(|e| e.3).collect();
        assert_eq!(names, [".", "..", "f0", "f1", "f2"]);
        // next-offsets are consecutive positions
        let offsets: Vec<i64> = page.iter().map(|e| e.1).collect();
        assert_eq!(offsets, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_readdir_resumed_at_final_offset_is_empty() {
        let entries = listing(3);
        let first = readdir_page(5, ROOT_NODE, &entries, 0);
        let resume = first.last().unwrap().1;
        assert!(readdir_page(5, ROOT_NODE, &entries, resume).is_empty());
    }

    #[test]
    fn test_readdir_resumed_mid_listing_skips_emitted_entries() {
        let entries = listing(4);
        // previous batch stopped after f1, whose next-offset is 4
        let page = readdir_page(5, ROOT_NODE, &entries, 4);
        let names: Vec<&str> = page.iter().map(|e| e.3).collect();
        assert_eq!(names, ["f2", "f3"]);
        assert_eq!(page[0].1, 5);
    }

    #[test]
    fn test_readdir_partial_batches_cover_listing_without_repeats() {
        let entries = listing(5);
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            // a reply buffer that fits two entries per call
            let batch: Vec<_> = readdir_page(5, ROOT_NODE, &entries, offset)
                .into_iter()
                .take(2)
                .collect();
            match batch.last() {
                Some(last) => offset = last.1,
                None => break,
            }
            seen.extend(batch.into_iter().map(|e| e.3.to_string()));
        }
        assert_eq!(seen, [".", "..", "f0", "f1", "f2", "f3", "f4"]);
    }

    #[test]
    fn test_readdir_empty_directory_terminates() {
        let entries = listing(0);
        let first = readdir_page(5, ROOT_NODE, &entries, 0);
        assert_eq!(first.len(), 2);
        assert!(readdir_page(5, ROOT_NODE, &entries, 2).is_empty());
    }
}
