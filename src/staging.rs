//! 单请求范围的暂存文件，离开作用域时自动删除。

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// 暂存目录下唯一命名的文件路径；`Drop` 时删除文件（若存在）。
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// 在暂存目录中分配新路径（文件尚未创建）。
    pub fn allocate(staging_dir: &Path, prefix: &str) -> Self {
        let path = staging_dir.join(format!("{prefix}_{}", Uuid::new_v4()));
        Self { path }
    }

    /// 分配路径并写入数据。
    pub async fn write(staging_dir: &Path, prefix: &str, data: &[u8]) -> std::io::Result<Self> {
        let staged = Self::allocate(staging_dir, prefix);
        fs::write(&staged.path, data).await?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "staged file removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = ?self.path, error = %err, "failed to remove staged file"),
        }
    }
}
