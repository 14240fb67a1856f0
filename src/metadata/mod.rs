use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::debug;
use crate::error::{FsError, Result};
use crate::fs::path::{self, SEPARATOR};
use crate::posix::{Entry, EntryKind};

/// 元数据存储接口
///
/// 路径 -> 条目 的映射。文件系统操作只通过这个接口读写元数据，
/// 方便替换成其他实现（本地缓存文件、分布式锁服务等）。
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    fn get(&self, path: &str) -> Option<Entry>;

    fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// 插入新条目；路径已存在时替换该名字指向的记录
    fn insert(&self, path: &str, entry: Entry);

    /// 删除一个名字，返回删除后的记录（链接计数已减一）
    fn remove(&self, path: &str) -> Option<Entry>;

    /// 原地修改，返回修改后的副本
    fn update(&self, path: &str, f: &mut dyn FnMut(&mut Entry)) -> Option<Entry>;

    /// 让 `target` 与 `source` 共享同一条记录，链接计数加一
    fn link(&self, source: &str, target: &str) -> Result<Entry>;

    /// 把名字从 `old` 移到 `new`，记录本身不变
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// 与 `path` 共享同一记录的其他名字，已排序
    fn other_names(&self, path: &str) -> Vec<String>;

    /// 是否有记录的内容存放在 `key`
    fn key_in_use(&self, key: &str) -> bool;

    /// `dir` 之下的所有路径（按分隔符边界匹配），已排序
    fn paths_under(&self, dir: &str) -> Vec<String>;

    /// `dir` 的直接子项
    fn children(&self, dir: &str) -> Vec<(String, EntryKind)>;

    /// 重新计算所有目录的链接计数：2 + 直接子目录数
    fn refresh_dir_link_counts(&self);

    fn len(&self) -> usize;
}

type NodeId = u64;

#[derive(Debug, Default)]
struct TreeInner {
    names: HashMap<String, NodeId>,
    nodes: HashMap<NodeId, Entry>,
    next_node: NodeId,
}

impl TreeInner {
    fn alloc(&mut self, entry: Entry) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(id, entry);
        id
    }

    /// 解除名字与记录的绑定，没有其他名字时回收记录
    fn detach(&mut self, path: &str) -> Option<Entry> {
        let id = self.names.remove(path)?;
        let still_named = self.names.values().any(|&other| other == id);
        if still_named {
            let entry = self.nodes.get_mut(&id)?;
            entry.link_count = entry.link_count.saturating_sub(1);
            entry.changed_at = SystemTime::now();
            Some(entry.clone())
        } else {
            let mut entry = self.nodes.remove(&id)?;
            if entry.kind == EntryKind::File {
                entry.link_count = entry.link_count.saturating_sub(1);
            }
            Some(entry)
        }
    }
}

/// 内存中的元数据树
///
/// 名字映射到节点，节点保存条目；硬链接即多个名字指向同一节点。
/// 内部读写锁只在内存操作期间持有，不跨越对象存储调用。
#[derive(Debug, Default)]
pub struct MetadataTree {
    inner: RwLock<TreeInner>,
}

impl MetadataTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetadataStore for MetadataTree {
    fn get(&self, path: &str) -> Option<Entry> {
        let inner = self.read();
        let id = inner.names.get(path)?;
        inner.nodes.get(id).cloned()
    }

    fn insert(&self, path: &str, entry: Entry) {
        let mut inner = self.write();
        if inner.names.contains_key(path) {
            inner.detach(path);
        }
        let id = inner.alloc(entry);
        inner.names.insert(path.to_string(), id);
        debug!("元数据插入: {}", path);
    }

    fn remove(&self, path: &str) -> Option<Entry> {
        let removed = self.write().detach(path);
        if removed.is_some() {
            debug!("元数据删除: {}", path);
        }
        removed
    }

    fn update(&self, path: &str, f: &mut dyn FnMut(&mut Entry)) -> Option<Entry> {
        let mut inner = self.write();
        let id = *inner.names.get(path)?;
        let entry = inner.nodes.get_mut(&id)?;
        f(entry);
        Some(entry.clone())
    }

    fn link(&self, source: &str, target: &str) -> Result<Entry> {
        let mut inner = self.write();
        if inner.names.contains_key(target) {
            return Err(FsError::AlreadyExists(target.to_string()));
        }
        let id = *inner
            .names
            .get(source)
            .ok_or_else(|| FsError::NotFound(source.to_string()))?;
        let entry = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| FsError::NotFound(source.to_string()))?;
        entry.link_count += 1;
        entry.touch_modified();
        let linked = entry.clone();
        inner.names.insert(target.to_string(), id);
        debug!("元数据链接: {} -> {}", target, source);
        Ok(linked)
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut inner = self.write();
        if inner.names.contains_key(new) {
            return Err(FsError::AlreadyExists(new.to_string()));
        }
        let id = inner
            .names
            .remove(old)
            .ok_or_else(|| FsError::NotFound(old.to_string()))?;
        inner.names.insert(new.to_string(), id);
        Ok(())
    }

    fn other_names(&self, path: &str) -> Vec<String> {
        let inner = self.read();
        let Some(&id) = inner.names.get(path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = inner
            .names
            .iter()
            .filter(|(p, other)| **other == id && p.as_str() != path)
            .map(|(p, _)| p.clone())
            .collect();
        names.sort();
        names
    }

    fn key_in_use(&self, key: &str) -> bool {
        self.read().nodes.values().any(|e| e.object_key == key)
    }

    fn paths_under(&self, dir: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .read()
            .names
            .keys()
            .filter(|p| path::is_descendant(p, dir))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    fn children(&self, dir: &str) -> Vec<(String, EntryKind)> {
        let prefix = path::child_prefix(dir);
        let inner = self.read();
        let mut children: Vec<(String, EntryKind)> = inner
            .names
            .iter()
            .filter(|(p, _)| path::is_descendant(p, dir))
            .filter_map(|(p, id)| {
                let rest = &p[prefix.len()..];
                if rest.is_empty() || rest.contains(SEPARATOR) {
                    return None;
                }
                let kind = inner.nodes.get(id)?.kind;
                Some((rest.to_string(), kind))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    fn refresh_dir_link_counts(&self) {
        let mut inner = self.write();
        let mut counts: HashMap<NodeId, u32> = HashMap::new();
        for (p, id) in &inner.names {
            if inner.nodes.get(id).map(|e| e.is_dir()).unwrap_or(false) {
                counts.entry(*id).or_insert(2);
                if p != path::ROOT {
                    if let Some(parent) = inner.names.get(path::parent_of(p)) {
                        *counts.entry(*parent).or_insert(2) += 1;
                    }
                }
            }
        }
        for (id, count) in counts {
            if let Some(entry) = inner.nodes.get_mut(&id) {
                entry.link_count = count;
            }
        }
    }

    fn len(&self) -> usize {
        self.read().names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(paths: &[(&str, EntryKind)]) -> MetadataTree {
        let tree = MetadataTree::new();
        tree.insert("/", Entry::new_directory("", 0o755));
        for (p, kind) in paths {
            let entry = match kind {
                EntryKind::File => Entry::new_file(path::file_key(p), 0o644, 0),
                EntryKind::Directory => Entry::new_directory(path::dir_key(p), 0o755),
            };
            tree.insert(p, entry);
        }
        tree
    }

    #[test]
    fn test_children_only_immediate() {
        let tree = tree_with(&[
            ("/a", EntryKind::Directory),
            ("/a/x.txt", EntryKind::File),
            ("/a/sub", EntryKind::Directory),
            ("/a/sub/deep.txt", EntryKind::File),
            ("/ab", EntryKind::File),
        ]);

        let names: Vec<String> = tree.children("/a").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["sub".to_string(), "x.txt".to_string()]);

        let root: Vec<String> = tree.children("/").into_iter().map(|(n, _)| n).collect();
        assert_eq!(root, vec!["a".to_string(), "ab".to_string()]);
    }

    #[test]
    fn test_paths_under_respects_boundary() {
        let tree = tree_with(&[
            ("/a", EntryKind::Directory),
            ("/ab", EntryKind::File),
        ]);
        assert!(tree.paths_under("/a").is_empty());
    }

    #[test]
    fn test_link_shares_record() {
        let tree = tree_with(&[("/f", EntryKind::File)]);
        let linked = tree.link("/f", "/g").unwrap();
        assert_eq!(linked.link_count, 2);

        tree.update("/g", &mut |e| e.size = 10);
        assert_eq!(tree.get("/f").unwrap().size, 10);

        let removed = tree.remove("/f").unwrap();
        assert_eq!(removed.link_count, 1);
        assert_eq!(tree.get("/g").unwrap().link_count, 1);

        let removed = tree.remove("/g").unwrap();
        assert_eq!(removed.link_count, 0);
        assert!(!tree.contains("/g"));
    }

    #[test]
    fn test_other_names_and_key_owner() {
        let tree = tree_with(&[("/f", EntryKind::File), ("/h", EntryKind::File)]);
        tree.link("/f", "/g").unwrap();
        assert_eq!(tree.other_names("/f"), vec!["/g".to_string()]);
        assert_eq!(tree.other_names("/g"), vec!["/f".to_string()]);
        assert!(tree.other_names("/h").is_empty());

        let key = tree.get("/f").unwrap().object_key;
        tree.remove("/f");
        assert!(tree.key_in_use(&key));
        tree.remove("/g");
        assert!(!tree.key_in_use(&key));
    }

    #[test]
    fn test_link_conflicts() {
        let tree = tree_with(&[("/f", EntryKind::File), ("/g", EntryKind::File)]);
        assert!(matches!(tree.link("/f", "/g"), Err(FsError::AlreadyExists(_))));
        assert!(matches!(tree.link("/missing", "/h"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_rename_moves_name() {
        let tree = tree_with(&[("/f", EntryKind::File)]);
        tree.rename("/f", "/g").unwrap();
        assert!(!tree.contains("/f"));
        assert!(tree.contains("/g"));
    }

    #[test]
    fn test_refresh_dir_link_counts() {
        let tree = tree_with(&[
            ("/a", EntryKind::Directory),
            ("/a/b", EntryKind::Directory),
            ("/a/c", EntryKind::Directory),
            ("/a/f.txt", EntryKind::File),
        ]);
        tree.refresh_dir_link_counts();
        assert_eq!(tree.get("/").unwrap().link_count, 3);
        assert_eq!(tree.get("/a").unwrap().link_count, 4);
        assert_eq!(tree.get("/a/b").unwrap().link_count, 2);
        assert_eq!(tree.get("/a/f.txt").unwrap().link_count, 1);
    }
}
