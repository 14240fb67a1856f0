use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 挂载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// 只读挂载：所有修改操作返回 EROFS
    pub read_only: bool,
    pub allow_other: bool,
    /// 内核属性缓存时间（秒）
    pub attr_ttl_secs: u64,
    /// 路径锁分片数
    pub lock_shards: usize,
    /// 挂载时并发下载对象的数量
    pub populate_concurrency: usize,
    /// 单个对象允许的最大字节数，超过的写入返回 EFBIG
    pub max_object_size: u64,
    pub fs_name: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_other: false,
            attr_ttl_secs: 1,
            lock_shards: 64,
            populate_concurrency: 8,
            max_object_size: 1 << 30,
            fs_name: "bucketfs".to_string(),
        }
    }
}

impl MountConfig {
    /// 从 JSON 文件加载，缺省字段使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        Self::from_json(&contents).with_context(|| format!("解析配置文件失败: {:?}", path))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
