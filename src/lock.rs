use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 按路径分片的锁表
///
/// 每个逻辑操作锁住它涉及的所有路径（以及父目录），
/// 分片按下标升序获取，保证不会死锁。
#[derive(Debug)]
pub struct PathLocks {
    shards: Vec<Mutex<()>>,
}

/// 持有一组分片锁，drop 时释放
pub struct PathGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl PathLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    fn shard_of(&self, path: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// 锁住 `paths` 对应的分片（去重、升序）
    pub async fn lock(&self, paths: &[&str]) -> PathGuard<'_> {
        let mut indices: Vec<usize> = paths.iter().map(|p| self.shard_of(p)).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for idx in &indices {
            guards.push(self.shards[*idx].lock().await);
        }
        debug!("path locks acquired: paths={:?}, shards={:?}", paths, indices);
        PathGuard { _guards: guards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
