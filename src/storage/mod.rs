use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::error::Result;

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// 对象元信息（list 的返回项）
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 扁平键值对象存储
///
/// 只支持整对象读写；目录仅是以 `/` 结尾的空对象。
/// 网络传输、认证、重试都由具体实现负责。
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// 读取整个对象；不存在时返回 `FsError::NotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// 整体替换对象内容
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    /// 删除对象；不存在时返回 `FsError::NotFound`
    async fn delete(&self, key: &str) -> Result<()>;
    /// 列出所有以 `prefix` 开头的对象
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}
