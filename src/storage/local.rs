use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};
use crate::error::{FsError, Result};
use super::{ObjectMeta, ObjectStore};

/// 用本地目录模拟 bucket
///
/// 文件对象对应普通文件，目录标记对应子目录。
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { base_path: root }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_end_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FsError::InvalidOperation(format!("非法对象键: {}", key)));
        }
        Ok(self.base_path.join(relative))
    }
}

fn map_io(key: &str, e: std::io::Error) -> FsError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound(key.to_string())
    } else {
        error!("local store error for key={}: {:?}", key, e);
        FsError::Io(e)
    }
}

fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        if key.ends_with('/') {
            let metadata = tokio::fs::metadata(&full_path)
                .await
                .map_err(|e| map_io(key, e))?;
            if !metadata.is_dir() {
                return Err(FsError::NotFound(key.to_string()));
            }
            return Ok(Vec::new());
        }
        tokio::fs::read(&full_path).await.map_err(|e| map_io(key, e))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!("put: writing to {:?}, size={}", full_path, data.len());
        if key.ends_with('/') {
            return tokio::fs::create_dir_all(&full_path)
                .await
                .map_err(|e| map_io(key, e));
        }
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, e))?;
        }
        tokio::fs::write(&full_path, data)
            .await
            .map_err(|e| map_io(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        if key.ends_with('/') {
            tokio::fs::remove_dir(&full_path)
                .await
                .map_err(|e| map_io(key, e))
        } else {
            tokio::fs::remove_file(&full_path)
                .await
                .map_err(|e| map_io(key, e))
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        if !self.base_path.exists() {
            return Ok(objects);
        }

        let mut pending = vec![(self.base_path.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| map_io(&key_prefix, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| map_io(&key_prefix, e))?
            {
                let name = match entry.file_name().to_str() {
                    Some(name) => name.to_string(),
                    None => {
                        debug!("跳过非 UTF-8 文件名: {:?}", entry.file_name());
                        continue;
                    }
                };
                let metadata = entry.metadata().await.map_err(|e| map_io(&name, e))?;
                let updated_at = to_utc(metadata.modified()).unwrap_or_else(Utc::now);
                let created_at = to_utc(metadata.created()).unwrap_or(updated_at);

                let (key, size) = if metadata.is_dir() {
                    let key = format!("{}{}/", key_prefix, name);
                    pending.push((entry.path(), key.clone()));
                    (key, 0)
                } else {
                    (format!("{}{}", key_prefix, name), metadata.len())
                };

                if key.starts_with(prefix) {
                    objects.push(ObjectMeta {
                        key,
                        size,
                        created_at,
                        updated_at,
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_objects() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path().to_path_buf());

        store.put("docs/a.txt", b"hello").await.unwrap();
        assert_eq!(store.get("docs/a.txt").await.unwrap(), b"hello");
        assert!(temp_dir.path().join("docs/a.txt").is_file());

        store.delete("docs/a.txt").await.unwrap();
        assert!(matches!(store.get("docs/a.txt").await, Err(FsError::NotFound(_))));
        assert!(matches!(store.delete("docs/a.txt").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_markers() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path().to_path_buf());

        store.put("d/", b"").await.unwrap();
        assert!(temp_dir.path().join("d").is_dir());
        assert_eq!(store.get("d/").await.unwrap(), Vec::<u8>::new());

        store.delete("d/").await.unwrap();
        assert!(!temp_dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn test_list_walks_tree() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path().to_path_buf());

        store.put("top.txt", b"1").await.unwrap();
        store.put("d/", b"").await.unwrap();
        store.put("d/inner.txt", b"22").await.unwrap();

        let keys: Vec<String> = store.list("").await.unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["d/", "d/inner.txt", "top.txt"]);

        let listed = store.list("d/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path().to_path_buf());
        assert!(matches!(
            store.put("../escape", b"x").await,
            Err(FsError::InvalidOperation(_))
        ));
    }
}
