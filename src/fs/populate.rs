use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use crate::error::{FsError, Result};
use crate::metadata::MetadataStore;
use crate::posix::Entry;
use crate::storage::{ObjectMeta, ObjectStore};
use super::path;

/// 挂载时新建条目的默认权限
pub const DEFAULT_DIR_PERM: u32 = 0o755;
pub const DEFAULT_FILE_PERM: u32 = 0o755;

/// 枚举 bucket 中的所有对象并建立元数据树
///
/// 每个文件都要完整下载一次来确定大小，只适合小 bucket。
pub async fn populate(
    store: &dyn ObjectStore,
    tree: &dyn MetadataStore,
    concurrency: usize,
) -> Result<usize> {
    let objects = store.list("").await?;
    info!("开始加载 bucket 元数据: {} 个对象", objects.len());

    let (markers, files): (Vec<ObjectMeta>, Vec<ObjectMeta>) =
        objects.into_iter().partition(|m| path::is_dir_key(&m.key));

    for meta in &markers {
        let dir_path = path::path_from_key(&meta.key);
        if dir_path == path::ROOT {
            continue;
        }
        let entry = Entry::new_directory(meta.key.clone(), DEFAULT_DIR_PERM)
            .with_times(meta.created_at.into(), meta.updated_at.into());
        debug!("populate: 目录 {}", dir_path);
        tree.insert(&dir_path, entry);
    }

    let downloads: Vec<(ObjectMeta, Result<Vec<u8>>)> = stream::iter(files)
        .map(|meta| async move {
            let content = store.get(&meta.key).await;
            (meta, content)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (meta, content) in downloads {
        let content = match content {
            Ok(content) => content,
            Err(FsError::NotFound(_)) => {
                warn!("populate: 对象在枚举后消失，跳过: {}", meta.key);
                continue;
            }
            Err(e) => return Err(e),
        };
        let file_path = path::path_from_key(&meta.key);
        if tree.get(&file_path).map(|e| e.is_dir()).unwrap_or(false) {
            warn!("populate: 对象 {} 与目录标记同名，保留目录并跳过该对象", meta.key);
            continue;
        }
        let entry = Entry::new_file(meta.key.clone(), DEFAULT_FILE_PERM, content.len() as u64)
            .with_times(meta.created_at.into(), meta.updated_at.into());
        debug!("populate: 文件 {} ({} bytes)", file_path, content.len());
        tree.insert(&file_path, entry);
    }

    tree.insert(path::ROOT, Entry::new_directory("", DEFAULT_DIR_PERM));

    synthesize_ancestors(tree);
    tree.refresh_dir_link_counts();

    let total = tree.len();
    info!("bucket 元数据加载完成: {} 个条目", total);
    Ok(total)
}

/// 补齐没有目录标记的中间目录（例如只有 `a/b.txt` 没有 `a/`）
fn synthesize_ancestors(tree: &dyn MetadataStore) {
    for p in tree.paths_under(path::ROOT) {
        let mut parent = path::parent_of(&p);
        while parent != path::ROOT && !tree.contains(parent) {
            debug!("populate: 补齐隐式目录 {}", parent);
            tree.insert(parent, Entry::new_directory(path::dir_key(parent), DEFAULT_DIR_PERM));
            parent = path::parent_of(parent);
        }
    }
}
