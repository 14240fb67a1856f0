use std::collections::BTreeMap;
use std::sync::RwLock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use crate::error::{FsError, Result};
use super::{ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 内存对象存储，用于测试和演示
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置对象（不经过 async 接口）
    pub fn with_objects<I, K, V>(objects: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let now = Utc::now();
        let map = objects
            .into_iter()
            .map(|(k, v)| {
                (
                    k.into(),
                    StoredObject {
                        data: v.into(),
                        created_at: now,
                        updated_at: now,
                    },
                )
            })
            .collect();
        Self {
            objects: RwLock::new(map),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| FsError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let created_at = objects.get(key).map(|o| o.created_at).unwrap_or(now);
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                created_at,
                updated_at: now,
            },
        );
        debug!("memory put: {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectMeta {
                key: k.clone(),
                size: o.data.len() as u64,
                created_at: o.created_at,
                updated_at: o.updated_at,
            })
            .collect())
    }
}
