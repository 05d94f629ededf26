//! 登录处理：用后端会话校验凭据并写入缓存。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::body::{BodyError, decode_json, read_body_limited};
use crate::config::JSON_BODY_LIMIT;
use crate::credentials::CredentialCache;
use crate::error::{ApiError, Outcome};
use crate::sanitize::sanitize_error;
use crate::session::StorageClient;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

/// 登录接口：失败时同样返回 200 与 `{ok:false, message}`。
pub async fn login(
    Extension(storage): Extension<Arc<StorageClient>>,
    Extension(credentials): Extension<Arc<CredentialCache>>,
    body: AxumBody,
) -> Result<JsonResponse<Outcome>, ApiError> {
    let bytes = match read_body_limited(body, JSON_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            return Err(ApiError::BadRequest("Request body too large".into()));
        }
        Err(BodyError::Read(err)) => return Err(ApiError::Internal(err)),
    };
    let payload: LoginRequest = decode_json(&bytes);

    let username = payload.username.unwrap_or_default();
    if username.is_empty() {
        return Ok(JsonResponse(Outcome::failure("Username required")));
    }
    let password = payload.password.unwrap_or_default();

    match storage.verify(&username, &password).await {
        Ok(()) => {
            credentials.remember(&username, &password).await;
            let cached_users = credentials.len().await;
            info!(username, cached_users, "login succeeded");
            Ok(JsonResponse(Outcome::success()))
        }
        Err(err) => {
            warn!(username, error = err.message(), "login failed");
            Ok(JsonResponse(Outcome::failure(sanitize_error(err.message()))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::{MemoryBackend, client};

    fn make_state(backend: &Arc<MemoryBackend>) -> (Arc<StorageClient>, Arc<CredentialCache>) {
        (Arc::new(client(backend)), Arc::new(CredentialCache::new()))
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn login_future_is_send() {
        let backend = MemoryBackend::with_user("bob", "");
        let (storage, credentials) = make_state(&backend);
        let future = login(
            Extension(storage),
            Extension(credentials),
            AxumBody::from(r#"{"username":"bob"}"#),
        );
        assert_send(&future);
    }

    #[tokio::test]
    async fn empty_password_login_is_cached() {
        let backend = MemoryBackend::with_user("bob", "");
        let (storage, credentials) = make_state(&backend);

        let JsonResponse(outcome) = login(
            Extension(storage),
            Extension(credentials.clone()),
            AxumBody::from(r#"{"username":"bob"}"#),
        )
        .await
        .unwrap_or_else(|_| panic!("login failed"));

        assert!(outcome.ok);
        assert_eq!(credentials.len().await, 1);
        assert_eq!(credentials.password_for("bob").await, "");
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn missing_username_is_rejected_without_session() {
        let backend = MemoryBackend::with_user("bob", "");
        let (storage, credentials) = make_state(&backend);

        let JsonResponse(outcome) = login(
            Extension(storage),
            Extension(credentials),
            AxumBody::from("garbage"),
        )
        .await
        .unwrap_or_else(|_| panic!("login errored"));

        assert!(!outcome.ok);
        assert_eq!(outcome.message.as_deref(), Some("Username required"));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test]
    async fn wrong_password_is_sanitized_and_not_cached() {
        let backend = MemoryBackend::with_user("bob", "secret");
        let (storage, credentials) = make_state(&backend);

        let JsonResponse(outcome) = login(
            Extension(storage),
            Extension(credentials.clone()),
            AxumBody::from(r#"{"username":"bob","password":"nope"}"#),
        )
        .await
        .unwrap_or_else(|_| panic!("login errored"));

        assert!(!outcome.ok);
        assert_eq!(outcome.message.as_deref(), Some("Authentication failed"));
        assert_eq!(credentials.len().await, 0);
    }
}
