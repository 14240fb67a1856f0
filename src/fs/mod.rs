use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use crate::config::MountConfig;
use crate::error::{FsError, Result};
use crate::lock::{PathGuard, PathLocks};
use crate::metadata::{MetadataStore, MetadataTree};
use crate::posix::{Entry, EntryKind};
use crate::storage::ObjectStore;

pub mod path;
mod populate;

pub use populate::{populate, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM};

/// 对象转换层
///
/// 把文件系统操作翻译成对象存储的 get/put/delete/list，并同步元数据树。
/// 每个修改操作在路径锁内完成"读条目 -> 存储往返 -> 写条目"。
#[derive(Debug)]
pub struct ObjectFs {
    store: Arc<dyn ObjectStore>,
    tree: Arc<dyn MetadataStore>,
    locks: PathLocks,
    next_handle: AtomicU64,
    read_only: bool,
    max_object_size: u64,
}

impl ObjectFs {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tree: Arc<dyn MetadataStore>,
        config: &MountConfig,
    ) -> Self {
        Self {
            store,
            tree,
            locks: PathLocks::new(config.lock_shards),
            next_handle: AtomicU64::new(0),
            read_only: config.read_only,
            max_object_size: config.max_object_size,
        }
    }

    /// 从对象存储加载元数据并创建文件系统
    pub async fn mount(store: Arc<dyn ObjectStore>, config: &MountConfig) -> Result<Self> {
        let tree: Arc<dyn MetadataStore> = Arc::new(MetadataTree::new());
        populate(store.as_ref(), tree.as_ref(), config.populate_concurrency).await?;
        info!(
            "文件系统就绪: entries={}, read_only={}",
            tree.len(),
            config.read_only
        );
        Ok(Self::new(store, tree, config))
    }

    pub fn tree(&self) -> &Arc<dyn MetadataStore> {
        &self.tree
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn entry(&self, path: &str) -> Result<Entry> {
        self.tree
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn check_mount_writable(&self, path: &str) -> Result<()> {
        if self.read_only {
            return Err(FsError::PermissionDenied(format!("只读挂载: {}", path)));
        }
        Ok(())
    }

    fn check_writable(&self, path: &str, entry: &Entry) -> Result<()> {
        self.check_mount_writable(path)?;
        if entry.read_only {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn require_parent_dir(&self, path: &str) -> Result<Entry> {
        let parent = path::parent_of(path);
        let entry = self.entry(parent)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory(parent.to_string()));
        }
        Ok(entry)
    }

    fn adjust_link_count(&self, path: &str, delta: i32) {
        self.tree.update(path, &mut |e| {
            e.link_count = if delta < 0 {
                e.link_count.saturating_sub(delta.unsigned_abs()).max(2)
            } else {
                e.link_count + delta as u32
            };
            e.touch_modified();
        });
    }

    /// 锁住 `path`、`extra` 以及条目的内容键，返回加锁后的条目
    ///
    /// 硬链接的各个名字共享内容键，经不同名字修改同一对象也会互斥。
    /// 加锁期间条目的内容键变了就重试。
    async fn lock_path(&self, path: &str, extra: &[&str]) -> (PathGuard<'_>, Option<Entry>) {
        loop {
            let seen = self.tree.get(path);
            let mut names: Vec<&str> = Vec::with_capacity(extra.len() + 2);
            names.push(path);
            names.extend_from_slice(extra);
            if let Some(entry) = &seen {
                names.push(&entry.object_key);
            }
            let guard = self.locks.lock(&names).await;

            let current = self.tree.get(path);
            let unchanged = match (&seen, &current) {
                (None, None) => true,
                (Some(a), Some(b)) => a.object_key == b.object_key,
                _ => false,
            };
            if unchanged {
                return (guard, current);
            }
            debug!("lock_path: {} 在加锁期间被修改，重试", path);
        }
    }

    /// 新对象键必须没有被任何现存记录占用
    fn claim_key(&self, key: &str) -> Result<()> {
        if self.tree.key_in_use(key) {
            warn!("对象键仍被其他名字使用: {}", key);
            return Err(FsError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn getattr(&self, path: &str) -> Result<Entry> {
        let mut entry = self.entry(path)?;
        entry.size = entry.reported_size();
        Ok(entry)
    }

    /// 创建空文件，返回新句柄
    ///
    /// 已存在的文件被清空（共享同一内容的硬链接一起清空）。
    pub async fn create(&self, path: &str, mode: u32) -> Result<u64> {
        let parent = path::parent_of(path);
        let (_guard, existing) = self.lock_path(path, &[parent]).await;
        self.check_mount_writable(path)?;
        self.require_parent_dir(path)?;

        match existing {
            Some(existing) if existing.is_dir() => {
                return Err(FsError::IsDirectory(path.to_string()));
            }
            Some(existing) => {
                self.check_writable(path, &existing)?;
                self.store.put(&existing.object_key, b"").await?;
                self.tree.update(path, &mut |e| {
                    e.size = 0;
                    e.set_perm(mode);
                    e.touch_modified();
                });
            }
            None => {
                let key = path::file_key(path);
                self.claim_key(&key)?;
                self.store.put(&key, b"").await?;
                self.tree.insert(path, Entry::new_file(key, mode, 0));
            }
        }

        let fh = self.next_handle();
        debug!("create: {} mode={:o} fh={}", path, mode, fh);
        Ok(fh)
    }

    pub async fn open(&self, path: &str) -> Result<u64> {
        self.entry(path)?;
        let fh = self.next_handle();
        debug!("open: {} fh={}", path, fh);
        Ok(fh)
    }

    /// 关闭文件时刷新修改时间
    pub async fn release(&self, path: &str) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let _guard = self.locks.lock(&[path]).await;
        self.tree.update(path, &mut |e| e.modified_at = SystemTime::now());
        Ok(())
    }

    /// 读取 `[offset, offset + size)`，越界部分被截掉
    pub async fn read(&self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>> {
        let entry = self.entry(path)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        let content = self
            .store
            .get(&entry.object_key)
            .await
            .map_err(FsError::into_not_found)?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size).min(content.len());
        self.tree.update(path, &mut |e| e.accessed_at = SystemTime::now());
        debug!("read: {} offset={} size={} -> {} bytes", path, offset, size, end - start);
        Ok(content[start..end].to_vec())
    }

    /// 整对象读-改-写：取回全部内容，拼接后整体写回
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let (_guard, entry) = self.lock_path(path, &[]).await;
        let entry = entry.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        self.check_writable(path, &entry)?;

        let too_large = || {
            FsError::TooLarge(format!(
                "{}: offset={} len={} 超过上限 {}",
                path,
                offset,
                data.len(),
                self.max_object_size
            ))
        };
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.max_object_size)
            .ok_or_else(too_large)?;
        let end = usize::try_from(end).map_err(|_| too_large())?;
        let start = end - data.len();

        let mut content = self
            .store
            .get(&entry.object_key)
            .await
            .map_err(FsError::into_not_found)?;

        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);

        self.store.put(&entry.object_key, &content).await?;

        let size = content.len() as u64;
        self.tree.update(path, &mut |e| {
            e.size = size;
            e.touch_modified();
        });
        debug!("write: {} offset={} len={} size={}", path, offset, data.len(), size);
        Ok(data.len())
    }

    /// 只做权限检查，不修改对象
    pub async fn truncate(&self, path: &str, length: u64) -> Result<()> {
        let entry = self.entry(path)?;
        self.check_writable(path, &entry)?;
        debug!("truncate: {} length={} (对象不变)", path, length);
        Ok(())
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<Entry> {
        let parent = path::parent_of(path);
        let _guard = self.locks.lock(&[path, parent]).await;
        self.check_mount_writable(path)?;
        if self.tree.contains(path) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        self.require_parent_dir(path)?;

        let key = path::dir_key(path);
        self.store.put(&key, b"").await?;

        let entry = Entry::new_directory(key, mode);
        self.tree.insert(path, entry.clone());
        self.adjust_link_count(parent, 1);
        debug!("mkdir: {} mode={:o}", path, mode);
        Ok(entry)
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let parent = path::parent_of(path);
        let _guard = self.locks.lock(&[path, parent]).await;
        self.check_mount_writable(path)?;
        if path == path::ROOT {
            return Err(FsError::InvalidOperation("不能删除根目录".to_string()));
        }
        let entry = self.entry(path)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if !self.tree.paths_under(path).is_empty() {
            return Err(FsError::NotEmpty(path.to_string()));
        }

        match self.store.delete(&entry.object_key).await {
            Ok(()) => {}
            // 挂载时补齐的隐式目录没有标记对象
            Err(FsError::NotFound(_)) => {
                debug!("rmdir: 目录标记不存在: {}", entry.object_key);
            }
            Err(e) => return Err(e.into_not_found()),
        }

        self.tree.remove(path);
        self.adjust_link_count(parent, -1);
        debug!("rmdir: {}", path);
        Ok(())
    }

    /// 删除一个名字；最后一个名字被删除时才删除对象
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let parent = path::parent_of(path);
        let (_guard, entry) = self.lock_path(path, &[parent]).await;
        self.check_mount_writable(path)?;

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let key = path::file_key(path);
                return self.store.delete(&key).await.map_err(|e| {
                    warn!("unlink: 删除对象失败 {}: {}", key, e);
                    e.into_not_found()
                });
            }
        };
        if entry.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        if entry.link_count <= 1 {
            self.store
                .delete(&entry.object_key)
                .await
                .map_err(FsError::into_not_found)?;
        } else if entry.object_key == path::file_key(path) {
            self.hand_over_content(path, &entry).await?;
        }
        self.tree.remove(path);
        debug!("unlink: {} (剩余链接 {})", path, entry.link_count.saturating_sub(1));
        Ok(())
    }

    /// 内容键所属的名字被删除而仍有其他链接时，把内容移到剩余名字自己的键下
    ///
    /// 这样内容键总是某个现存名字对应的键，之后在原路径新建文件不会覆盖共享内容。
    async fn hand_over_content(&self, path: &str, entry: &Entry) -> Result<()> {
        let Some(heir) = self.tree.other_names(path).into_iter().next() else {
            return Ok(());
        };
        let new_key = path::file_key(&heir);
        let content = self
            .store
            .get(&entry.object_key)
            .await
            .map_err(FsError::into_not_found)?;
        self.store.put(&new_key, &content).await?;

        if let Err(e) = self.store.delete(&entry.object_key).await {
            error!("unlink: 旧对象删除失败 {}: {}", entry.object_key, e);
            if let Err(cleanup) = self.store.delete(&new_key).await {
                warn!("unlink: 清理副本失败 {}: {}", new_key, cleanup);
            }
            return Err(FsError::Storage(format!(
                "unlink {}: 共享内容迁移到 {} 失败: {}",
                path, new_key, e
            )));
        }

        self.tree.update(path, &mut |e| e.object_key = new_key.clone());
        debug!("unlink: 共享内容 {} -> {} ({})", entry.object_key, new_key, heir);
        Ok(())
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_parent = path::parent_of(old);
        let new_parent = path::parent_of(new);
        let (_guard, entry) = self.lock_path(old, &[new, old_parent, new_parent]).await;
        self.check_mount_writable(old)?;

        let entry = entry.ok_or_else(|| FsError::NotFound(old.to_string()))?;
        if self.tree.contains(new) {
            return Err(FsError::AlreadyExists(new.to_string()));
        }
        self.require_parent_dir(new)?;

        if entry.is_dir() {
            if path::is_descendant(new, old) {
                return Err(FsError::InvalidOperation(format!(
                    "不能把目录移动到自身之下: {} -> {}",
                    old, new
                )));
            }
            self.rename_directory(old, new, &entry).await?;
            if old_parent != new_parent {
                self.adjust_link_count(old_parent, -1);
                self.adjust_link_count(new_parent, 1);
            }
        } else {
            self.rename_file(old, new, &entry).await?;
        }
        debug!("rename: {} -> {}", old, new);
        Ok(())
    }

    async fn rename_file(&self, old: &str, new: &str, entry: &Entry) -> Result<()> {
        let new_key = path::file_key(new);
        self.claim_key(&new_key)?;
        let content = self
            .store
            .get(&entry.object_key)
            .await
            .map_err(FsError::into_not_found)?;
        self.store.put(&new_key, &content).await?;

        if let Err(e) = self.store.delete(&entry.object_key).await {
            // 副本已写入但旧对象仍在：两个名字都保留，并把错误报告给调用方
            error!("rename: 旧对象删除失败 {}: {}", entry.object_key, e);
            let mut copy = entry.clone();
            copy.object_key = new_key;
            copy.link_count = 1;
            copy.touch_modified();
            self.tree.insert(new, copy);
            return Err(FsError::Storage(format!(
                "rename {} -> {}: 已复制但删除旧对象失败: {}",
                old, new, e
            )));
        }

        self.tree.rename(old, new)?;
        self.tree.update(new, &mut |e| {
            e.object_key = new_key.clone();
            e.touch_modified();
        });
        Ok(())
    }

    /// 目录重命名：复制标记和所有子对象到新前缀，再删除旧对象
    async fn rename_directory(&self, old: &str, new: &str, entry: &Entry) -> Result<()> {
        let descendants = self.tree.paths_under(old);

        let new_marker = path::dir_key(new);
        self.store.put(&new_marker, b"").await?;

        let mut moved: Vec<(String, String, Entry)> = Vec::with_capacity(descendants.len());
        for child in &descendants {
            let child_entry = self.entry(child)?;
            let target = path::rebase(child, old, new);
            if child_entry.is_dir() {
                self.store.put(&path::dir_key(&target), b"").await?;
            } else if child_entry.object_key == path::file_key(child) {
                let content = self
                    .store
                    .get(&child_entry.object_key)
                    .await
                    .map_err(FsError::into_not_found)?;
                self.store.put(&path::file_key(&target), &content).await?;
            }
            moved.push((child.clone(), target, child_entry));
        }

        self.tree.rename(old, new)?;
        self.tree.update(new, &mut |e| {
            e.object_key = new_marker.clone();
            e.touch_modified();
        });

        let mut stale_keys = Vec::new();
        for (child, target, child_entry) in &moved {
            self.tree.rename(child, target)?;
            let new_key = if child_entry.is_dir() {
                Some(path::dir_key(target))
            } else if child_entry.object_key == path::file_key(child) {
                Some(path::file_key(target))
            } else {
                None
            };
            if let Some(new_key) = new_key {
                stale_keys.push(child_entry.object_key.clone());
                self.tree.update(target, &mut |e| e.object_key = new_key.clone());
            }
        }

        // 先删子对象再删目录标记
        stale_keys.sort_by(|a, b| b.cmp(a));
        stale_keys.push(entry.object_key.clone());
        let mut first_error = None;
        for key in stale_keys {
            match self.store.delete(&key).await {
                Ok(()) | Err(FsError::NotFound(_)) => {}
                Err(e) => {
                    error!("rename: 旧对象删除失败 {}: {}", key, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(FsError::Storage(format!(
                "rename {} -> {}: 目录已移动但旧对象残留: {}",
                old, new, e
            ))),
            None => Ok(()),
        }
    }

    /// 硬链接：`target` 与 `source` 共享内容和链接计数
    pub async fn link(&self, target: &str, source: &str) -> Result<Entry> {
        let target_parent = path::parent_of(target);
        let _guard = self.locks.lock(&[target, source, target_parent]).await;
        self.check_mount_writable(target)?;

        let entry = self.entry(source)?;
        if entry.is_dir() {
            return Err(FsError::NotPermitted(format!("不能为目录创建硬链接: {}", source)));
        }
        if self.tree.contains(target) {
            return Err(FsError::AlreadyExists(target.to_string()));
        }
        self.require_parent_dir(target)?;

        let linked = self.tree.link(source, target)?;
        debug!("link: {} -> {} (nlink={})", target, source, linked.link_count);
        Ok(linked)
    }

    /// 目录项列表：`.`、`..`，然后是直接子项
    pub async fn readdir(&self, path: &str) -> Result<Vec<(String, EntryKind)>> {
        let entry = self.entry(path)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let mut entries = vec![
            (".".to_string(), EntryKind::Directory),
            ("..".to_string(), EntryKind::Directory),
        ];
        entries.extend(self.tree.children(path));
        Ok(entries)
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<Entry> {
        let _guard = self.locks.lock(&[path]).await;
        self.check_mount_writable(path)?;
        self.tree
            .update(path, &mut |e| e.set_perm(mode))
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<Entry> {
        let _guard = self.locks.lock(&[path]).await;
        self.check_mount_writable(path)?;
        self.tree
            .update(path, &mut |e| e.set_owner(uid, gid))
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub async fn utimens(
        &self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<Entry> {
        let _guard = self.locks.lock(&[path]).await;
        self.check_mount_writable(path)?;
        self.tree
            .update(path, &mut |e| {
                if let Some(atime) = atime {
                    e.accessed_at = atime;
                }
                if let Some(mtime) = mtime {
                    e.modified_at = mtime;
                }
                e.changed_at = SystemTime::now();
            })
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// 标记条目只读，之后的写入返回 PermissionDenied
    pub async fn set_read_only(&self, path: &str, read_only: bool) -> Result<Entry> {
        let _guard = self.locks.lock(&[path]).await;
        self.tree
            .update(path, &mut |e| e.read_only = read_only)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// 扩展属性不持久化，始终返回空
    pub async fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        self.entry(path)?;
        debug!("getxattr: {} name={} (未实现，返回空)", path, name);
        Ok(Vec::new())
    }

    pub async fn listxattr(&self, path: &str) -> Result<Vec<u8>> {
        self.entry(path)?;
        Ok(Vec::new())
    }
}
