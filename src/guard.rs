//! 按客户端的请求限流与并发连接限制。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::Request;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ApiError;
use crate::http::client_identity;

pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";
pub const TOO_MANY_CONNECTIONS: &str = "Too many concurrent connections. Please try again later.";

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RateRecord {
    pub count: u32,
    pub window_reset_at: Instant,
}

/// 固定窗口限流 + 每客户端并发槽位。
#[derive(Debug)]
pub struct AbuseGuard {
    config: GuardConfig,
    rates: Mutex<HashMap<String, RateRecord>>,
    connections: Mutex<HashMap<String, u32>>,
}

impl AbuseGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            rates: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次请求，超出窗口配额时返回 false。
    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &str, now: Instant) -> bool {
        let mut rates = lock(&self.rates);
        if let Some(record) = rates.get_mut(identity)
            && now <= record.window_reset_at
        {
            if record.count >= self.config.max_requests {
                return false;
            }
            record.count += 1;
            return true;
        }
        rates.insert(
            identity.to_string(),
            RateRecord {
                count: 1,
                window_reset_at: now + self.config.window,
            },
        );
        true
    }

    /// 占用一个并发槽位；槽位在返回值被 drop 时释放。
    pub fn try_acquire_slot(self: &Arc<Self>, identity: &str) -> Option<ConnectionSlot> {
        let mut connections = lock(&self.connections);
        let current = connections.get(identity).copied().unwrap_or(0);
        if current >= self.config.max_connections {
            return None;
        }
        connections.insert(identity.to_string(), current + 1);
        Some(ConnectionSlot {
            guard: self.clone(),
            identity: identity.to_string(),
        })
    }

    /// 释放一个槽位，不会低于零。
    pub fn release_slot(&self, identity: &str) {
        let mut connections = lock(&self.connections);
        if let Some(current) = connections.get_mut(identity) {
            *current = current.saturating_sub(1);
            if *current == 0 {
                connections.remove(identity);
            }
        }
    }

    pub fn active_connections(&self, identity: &str) -> u32 {
        lock(&self.connections)
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    /// 清理窗口已过期的限流记录，返回清理数量。
    pub fn prune_expired(&self, now: Instant) -> usize {
        let mut rates = lock(&self.rates);
        let before = rates.len();
        rates.retain(|_, record| now <= record.window_reset_at);
        before - rates.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 请求作用域内持有的并发槽位。
#[derive(Debug)]
pub struct ConnectionSlot {
    guard: Arc<AbuseGuard>,
    identity: String,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.guard.release_slot(&self.identity);
    }
}

/// 准入中间件：先限流，再占用并发槽位，槽位覆盖整个处理过程。
pub async fn abuse_guard_middleware(
    Extension(guard): Extension<Arc<AbuseGuard>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let identity = client_identity(&req);

    if !guard.admit(&identity) {
        warn!(client_ip = identity, "rate limit exceeded");
        return ApiError::TooManyRequests(TOO_MANY_REQUESTS.into()).into_response();
    }

    let Some(_slot) = guard.try_acquire_slot(&identity) else {
        warn!(
            client_ip = identity,
            active = guard.active_connections(&identity),
            "connection limit exceeded"
        );
        return ApiError::TooManyRequests(TOO_MANY_CONNECTIONS.into()).into_response();
    };

    next.run(req).await
}
