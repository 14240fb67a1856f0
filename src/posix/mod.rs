use std::time::SystemTime;
use rustix::process::{getgid, getuid};

/// 文件类型位掩码
pub const TYPE_MASK: u32 = libc::S_IFMT as u32;
/// 权限位掩码（含 setuid/setgid/sticky）
pub const PERM_MASK: u32 = 0o7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn type_bits(self) -> u32 {
        match self {
            EntryKind::File => libc::S_IFREG as u32,
            EntryKind::Directory => libc::S_IFDIR as u32,
        }
    }
}

/// 单个路径的元数据记录
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub kind: EntryKind,
    /// 类型位 | 权限位
    pub mode: u32,
    pub size: u64,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub changed_at: SystemTime,
    pub accessed_at: SystemTime,
    pub link_count: u32,
    pub read_only: bool,
    pub uid: u32,
    pub gid: u32,
    /// 保存内容的对象键；硬链接的多个路径共享同一个键
    pub object_key: String,
}

impl Entry {
    pub fn new_file(object_key: impl Into<String>, perm: u32, size: u64) -> Self {
        Self::new(EntryKind::File, object_key.into(), perm, size, 1)
    }

    pub fn new_directory(object_key: impl Into<String>, perm: u32) -> Self {
        Self::new(EntryKind::Directory, object_key.into(), perm, 0, 2)
    }

    fn new(kind: EntryKind, object_key: String, perm: u32, size: u64, link_count: u32) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            mode: kind.type_bits() | (perm & PERM_MASK),
            size,
            created_at: now,
            modified_at: now,
            changed_at: now,
            accessed_at: now,
            link_count,
            read_only: false,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            object_key,
        }
    }

    /// 使用对象存储中的创建/更新时间
    pub fn with_times(mut self, created: SystemTime, updated: SystemTime) -> Self {
        self.created_at = created;
        self.modified_at = updated;
        self.changed_at = updated;
        self.accessed_at = SystemTime::now();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// 保留类型位，替换权限位
    pub fn set_perm(&mut self, mode: u32) {
        self.mode = (self.mode & TYPE_MASK) | (mode & PERM_MASK);
        self.changed_at = SystemTime::now();
    }

    pub fn set_owner(&mut self, uid: Option<u32>, gid: Option<u32>) {
        if let Some(uid) = uid {
            self.uid = uid;
        }
        if let Some(gid) = gid {
            self.gid = gid;
        }
        self.changed_at = SystemTime::now();
    }

    /// 内容变更：刷新 mtime 与 ctime
    pub fn touch_modified(&mut self) {
        let now = SystemTime::now();
        self.modified_at = now;
        self.changed_at = now;
    }

    /// getattr 看到的大小：目录始终为 0
    pub fn reported_size(&self) -> u64 {
        if self.is_dir() {
            0
        } else {
            self.size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_keeps_type_bits() {
        let mut entry = Entry::new_file("a.txt", 0o644, 0);
        assert_eq!(entry.mode & TYPE_MASK, libc::S_IFREG as u32);

        entry.set_perm(0o100600);
        assert_eq!(entry.perm(), 0o600);
        assert_eq!(entry.mode & TYPE_MASK, libc::S_IFREG as u32);
    }

    #[test]
    fn test_directory_defaults() {
        let mut dir = Entry::new_directory("d/", 0o755);
        dir.size = 4096;
        assert!(dir.is_dir());
        assert_eq!(dir.link_count, 2);
        assert_eq!(dir.reported_size(), 0);
    }

    #[test]
    fn test_set_owner_partial() {
        let mut entry = Entry::new_file("a.txt", 0o644, 0);
        let gid = entry.gid;
        entry.set_owner(Some(4242), None);
        assert_eq!(entry.uid, 4242);
        assert_eq!(entry.gid, gid);
    }
}
