//! 进程内凭据缓存：登录成功后记录用户名与密码。

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Username to last successfully used password. Lives for the whole process.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: RwLock<HashMap<String, String>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖凭据。
    pub async fn remember(&self, username: &str, password: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(username.to_string(), password.to_string());
    }

    /// 返回缓存的密码，未登录过的用户返回空字符串。
    pub async fn password_for(&self, username: &str) -> String {
        let entries = self.entries.read().await;
        entries.get(username).cloned().unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_user_gets_empty_password() {
        let cache = CredentialCache::new();
        assert_eq!(cache.password_for("nobody").await, "");
    }

    #[tokio::test]
    async fn relogin_overwrites_password() {
        let cache = CredentialCache::new();
        cache.remember("alice", "one").await;
        cache.remember("alice", "two").await;
        assert_eq!(cache.password_for("alice").await, "two");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_writers_are_not_lost() {
        let cache = Arc::new(CredentialCache::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.remember(&format!("user{i}"), "pw").await;
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }
        assert_eq!(cache.len().await, 32);
    }
}
