//! 限流表清理与暂存目录清理的后台任务。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{RATE_PRUNE_INTERVAL_SECS, STAGING_CLEAN_INTERVAL_SECS, STAGING_TTL_SECS};
use crate::guard::AbuseGuard;

/// 启动后台任务（限流记录清理与残留暂存文件清理）。
pub fn spawn_background_tasks(guard: Arc<AbuseGuard>, staging_dir: PathBuf) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = guard.prune_expired(Instant::now());
            if removed > 0 {
                debug!(removed, "pruned expired rate records");
            }
        }
    });

    tokio::spawn(async move {
        let ttl = Duration::from_secs(STAGING_TTL_SECS);
        let mut interval =
            tokio::time::interval(Duration::from_secs(STAGING_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_staging_dir(&staging_dir, ttl).await {
                warn!(error = %err, "staging cleanup failed");
            }
        }
    });
}

/// 删除超过 `ttl` 的暂存文件（例如超时后由后台线程迟到写入的文件）。
pub async fn cleanup_staging_dir(staging_dir: &Path, ttl: Duration) -> std::io::Result<usize> {
    if fs::metadata(staging_dir).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut dir = fs::read_dir(staging_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age >= ttl {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = ?path, "removed stale staging file");
                    removed += 1;
                }
                Err(err) => warn!(path = ?path, error = %err, "failed to remove staging file"),
            }
        }
    }
    Ok(removed)
}
