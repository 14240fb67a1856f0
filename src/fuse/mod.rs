use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite,
    ReplyXattr, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{c_int, EINVAL, ENOENT};
use crate::config::MountConfig;
use crate::error::FsError;
use crate::fs::{path, ObjectFs};
use crate::posix::{Entry, EntryKind};
use tracing::{debug, error, info, warn};

const BLOCK_SIZE: u32 = 512;

/// 内核 inode 号与挂载路径的双向映射
#[derive(Debug)]
struct InodeTable {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(path::ROOT.to_string(), FUSE_ROOT_ID);
        ino_to_path.insert(FUSE_ROOT_ID, path::ROOT.to_string());
        Self {
            path_to_ino,
            ino_to_path,
            next_ino: FUSE_ROOT_ID + 1,
        }
    }

    fn path(&self, ino: u64) -> Option<String> {
        self.ino_to_path.get(&ino).cloned()
    }

    fn allocate(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_ino.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_to_ino.insert(path.to_string(), ino);
        self.ino_to_path.insert(ino, path.to_string());
        debug!("allocate_ino: new ino={} for path={}", ino, path);
        ino
    }

    /// 硬链接：新名字复用已有的 inode 号
    fn alias(&mut self, path: &str, ino: u64) {
        self.path_to_ino.insert(path.to_string(), ino);
        self.ino_to_path.entry(ino).or_insert_with(|| path.to_string());
    }

    /// 删除一个名字；inode 还有其他名字时改指向剩余的名字
    fn remove(&mut self, path: &str) {
        let Some(ino) = self.path_to_ino.remove(path) else {
            return;
        };
        let remaining = self
            .path_to_ino
            .iter()
            .find(|(_, other)| **other == ino)
            .map(|(p, _)| p.clone());
        match remaining {
            Some(p) => {
                self.ino_to_path.insert(ino, p);
            }
            None => {
                self.ino_to_path.remove(&ino);
            }
        }
    }

    /// 重命名后把 `old` 及其子路径的 inode 转到新路径下
    fn rename(&mut self, old: &str, new: &str) {
        let moved: Vec<(String, u64)> = self
            .path_to_ino
            .iter()
            .filter(|(p, _)| p.as_str() == old || path::is_descendant(p, old))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (p, ino) in moved {
            let target = path::rebase(&p, old, new);
            self.path_to_ino.remove(&p);
            self.path_to_ino.insert(target.clone(), ino);
            self.ino_to_path.insert(ino, target);
        }
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

fn make_file_attr(ino: u64, entry: &Entry) -> FileAttr {
    let size = entry.reported_size();
    FileAttr {
        ino,
        size,
        blocks: (size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64,
        atime: entry.accessed_at,
        mtime: entry.modified_at,
        ctime: entry.changed_at,
        crtime: entry.created_at,
        kind: file_type(entry.kind),
        perm: entry.perm() as u16,
        nlink: entry.link_count,
        uid: entry.uid,
        gid: entry.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// 把 fuser 回调转发给 [`ObjectFs`]
pub struct FuseAdapter {
    fs: Arc<ObjectFs>,
    inodes: InodeTable,
    runtime: Handle,
    ttl: Duration,
}

impl FuseAdapter {
    pub fn new(fs: Arc<ObjectFs>, runtime: Handle, config: &MountConfig) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            runtime,
            ttl: Duration::from_secs(config.attr_ttl_secs),
        }
    }

    /// 在后台线程挂载；返回的会话被 drop 时自动卸载
    pub fn mount(self, mount_point: &Path, config: &MountConfig) -> std::io::Result<BackgroundSession> {
        let mut options = vec![
            MountOption::FSName(config.fs_name.clone()),
            MountOption::Subtype("bucketfs".to_string()),
            MountOption::DefaultPermissions,
        ];
        options.push(if config.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        if config.allow_other {
            options.push(MountOption::AllowOther);
        }
        info!("Mounting FUSE filesystem at {:?}", mount_point);
        fuser::spawn_mount2(self, mount_point, &options)
    }

    fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.runtime.block_on(f)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let parent_path = self.inodes.path(parent).ok_or(ENOENT)?;
        let name = name.to_str().ok_or(EINVAL)?;
        Ok(path::join(&parent_path, name))
    }

    fn reply_entry(&mut self, op: &str, path: &str, result: Result<Entry, FsError>, reply: ReplyEntry) {
        match result {
            Ok(entry) => {
                let ino = self.inodes.allocate(path);
                debug!("{}: success for path={}, ino={}", op, path, ino);
                reply.entry(&self.ttl, &make_file_attr(ino, &entry), 0);
            }
            Err(e) => {
                log_failure(op, path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn reply_empty(&self, op: &str, path: &str, result: Result<(), FsError>, reply: ReplyEmpty) {
        match result {
            Ok(()) => {
                debug!("{}: success for path={}", op, path);
                reply.ok();
            }
            Err(e) => {
                log_failure(op, path, &e);
                reply.error(e.errno());
            }
        }
    }
}

fn log_failure(op: &str, path: &str, e: &FsError) {
    match e {
        FsError::NotFound(_) => debug!("{}: not found path={}", op, path),
        FsError::Storage(_) | FsError::Io(_) => error!("{} error for path={}: {:?}", op, path, e),
        _ => warn!("{} failed for path={}: {}", op, path, e),
    }
}

macro_rules! path_or_reply {
    ($self:ident, $op:expr, $ino:expr, $reply:ident) => {
        match $self.inodes.path($ino) {
            Some(p) => p,
            None => {
                error!("{}: failed to get path for ino={}", $op, $ino);
                $reply.error(ENOENT);
                return;
            }
        }
    };
}

macro_rules! child_or_reply {
    ($self:ident, $op:expr, $parent:expr, $name:expr, $reply:ident) => {
        match $self.child_path($parent, $name) {
            Ok(p) => p,
            Err(errno) => {
                error!("{}: failed to get path for parent={}, name={:?}", $op, $parent, $name);
                $reply.error(errno);
                return;
            }
        }
    };
}

impl Filesystem for FuseAdapter {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            "FUSE session initialized: entries={}, read_only={}",
            self.fs.tree().len(),
            self.fs.is_read_only()
        );
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = child_or_reply!(self, "lookup", parent, name, reply);
        let result = self.block_on(self.fs.getattr(&path));
        self.reply_entry("lookup", &path, result, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = path_or_reply!(self, "getattr", ino, reply);
        match self.block_on(self.fs.getattr(&path)) {
            Ok(entry) => reply.attr(&self.ttl, &make_file_attr(ino, &entry)),
            Err(e) => {
                log_failure("getattr", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = path_or_reply!(self, "setattr", ino, reply);
        debug!("setattr: {} mode={:?} uid={:?} gid={:?} size={:?}", path, mode, uid, gid, size);
        let fs = Arc::clone(&self.fs);
        let result = self.block_on(async {
            if let Some(mode) = mode {
                fs.chmod(&path, mode).await?;
            }
            if uid.is_some() || gid.is_some() {
                fs.chown(&path, uid, gid).await?;
            }
            if let Some(size) = size {
                fs.truncate(&path, size).await?;
            }
            if atime.is_some() || mtime.is_some() {
                fs.utimens(&path, atime.map(resolve_time), mtime.map(resolve_time))
                    .await?;
            }
            fs.getattr(&path).await
        });
        match result {
            Ok(entry) => reply.attr(&self.ttl, &make_file_attr(ino, &entry)),
            Err(e) => {
                log_failure("setattr", &path, &e);
                reply.error(e.errno());
            }
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
        let path = child_or_reply!(self, "mkdir", parent, name, reply);
        debug!("mkdir: {}, mode={:o}", path, mode);
        let result = self.block_on(self.fs.mkdir(&path, mode));
        self.reply_entry("mkdir", &path, result, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_reply!(self, "unlink", parent, name, reply);
        let result = self.block_on(self.fs.unlink(&path));
        if result.is_ok() {
            self.inodes.remove(&path);
        }
        self.reply_empty("unlink", &path, result, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_reply!(self, "rmdir", parent, name, reply);
        let result = self.block_on(self.fs.rmdir(&path));
        if result.is_ok() {
            self.inodes.remove(&path);
        }
        self.reply_empty("rmdir", &path, result, reply);
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
        let old = child_or_reply!(self, "rename", parent, name, reply);
        let new = child_or_reply!(self, "rename", newparent, newname, reply);
        debug!("rename: {} -> {}", old, new);
        let result = self.block_on(self.fs.rename(&old, &new));
        if result.is_ok() {
            self.inodes.rename(&old, &new);
        }
        self.reply_empty("rename", &old, result, reply);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let source = path_or_reply!(self, "link", ino, reply);
        let target = child_or_reply!(self, "link", newparent, newname, reply);
        debug!("link: {} -> {}", target, source);
        match self.block_on(self.fs.link(&target, &source)) {
            Ok(entry) => {
                self.inodes.alias(&target, ino);
                debug!("link: success for path={}, ino={}", target, ino);
                reply.entry(&self.ttl, &make_file_attr(ino, &entry), 0);
            }
            Err(e) => {
                log_failure("link", &target, &e);
                reply.error(e.errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = path_or_reply!(self, "open", ino, reply);
        match self.block_on(self.fs.open(&path)) {
            Ok(fh) => {
                debug!("open: {} flags={:#x} fh={}", path, flags, fh);
                reply.opened(fh, 0);
            }
            Err(e) => {
                log_failure("open", &path, &e);
                reply.error(e.errno());
            }
        }
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
        let path = path_or_reply!(self, "read", ino, reply);
        let offset = offset.max(0) as u64;
        match self.block_on(self.fs.read(&path, size as usize, offset)) {
            Ok(data) => {
                debug!("read: success for path={}, returning {} bytes", path, data.len());
                reply.data(&data);
            }
            Err(e) => {
                log_failure("read", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = path_or_reply!(self, "write", ino, reply);
        let offset = offset.max(0) as u64;
        debug!("write: {}, offset={}, size={}", path, offset, data.len());
        match self.block_on(self.fs.write(&path, data, offset)) {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                log_failure("write", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush: ino={} fh={}", ino, fh);
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self, "release", ino, reply);
        let result = self.block_on(self.fs.release(&path));
        self.reply_empty("release", &path, result, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync: ino={} fh={} datasync={}", ino, fh, datasync);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir: ino={}", ino);
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = path_or_reply!(self, "readdir", ino, reply);
        debug!("readdir: {}, offset={}", path, offset);
        let entries = match self.block_on(self.fs.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => {
                log_failure("readdir", &path, &e);
                reply.error(e.errno());
                return;
            }
        };

        let parent_ino = self.inodes.allocate(path::parent_of(&path));
        let listed: Vec<(u64, FileType, String)> = entries
            .into_iter()
            .map(|(name, kind)| {
                let entry_ino = match name.as_str() {
                    "." => ino,
                    ".." => parent_ino,
                    _ => self.inodes.allocate(&path::join(&path, &name)),
                };
                (entry_ino, file_type(kind), name)
            })
            .collect();

        for (i, (entry_ino, kind, name)) in listed.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!("releasedir: ino={}", ino);
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = child_or_reply!(self, "create", parent, name, reply);
        debug!("create: {}, mode={:o}, flags={:#x}", path, mode, flags);
        let fs = Arc::clone(&self.fs);
        let result = self.block_on(async {
            let fh = fs.create(&path, mode).await?;
            let entry = fs.getattr(&path).await?;
            Ok::<_, FsError>((fh, entry))
        });
        match result {
            Ok((fh, entry)) => {
                let ino = self.inodes.allocate(&path);
                reply.created(&self.ttl, &make_file_attr(ino, &entry), 0, fh, 0);
            }
            Err(e) => {
                log_failure("create", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = path_or_reply!(self, "getxattr", ino, reply);
        let name = name.to_string_lossy();
        match self.block_on(self.fs.getxattr(&path, &name)) {
            Ok(value) if size == 0 => reply.size(value.len() as u32),
            Ok(value) => reply.data(&value),
            Err(e) => {
                log_failure("getxattr", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = path_or_reply!(self, "listxattr", ino, reply);
        match self.block_on(self.fs.listxattr(&path)) {
            Ok(value) if size == 0 => reply.size(value.len() as u32),
            Ok(value) => reply.data(&value),
            Err(e) => {
                log_failure("listxattr", &path, &e);
                reply.error(e.errno());
            }
        }
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
        debug!("setxattr: ino={} name={:?} (ignored)", ino, name);
        reply.ok();
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr: ino={} name={:?} (ignored)", ino, name);
        reply.ok();
    }
}
