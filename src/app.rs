//! 路由装配：CORS、准入控制、请求追踪与各接口处理器。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info_span};

use crate::config::TransferConfig;
use crate::credentials::CredentialCache;
use crate::error::{ApiError, not_found};
use crate::guard::{AbuseGuard, abuse_guard_middleware};
use crate::http::{cors_middleware, extract_forwarded_for};
use crate::sanitize::OPERATION_FAILED;
use crate::session::StorageClient;
use crate::{auth, files, logs, upload, version};

/// 进程级共享状态。
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<AbuseGuard>,
    pub credentials: Arc<CredentialCache>,
    pub storage: Arc<StorageClient>,
    pub transfer: Arc<TransferConfig>,
}

/// 构建完整路由；层的顺序保证 OPTIONS 在准入前返回，panic 在槽位释放前转为 500。
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/login", post(auth::login).fallback(not_found))
        .route("/api/files", get(files::list_files).fallback(not_found))
        .route(
            "/api/upload",
            post(upload::upload_file)
                .layer(DefaultBodyLimit::disable())
                .fallback(not_found),
        )
        .route("/api/download", get(files::download_file).fallback(not_found))
        .route("/api/file", delete(files::delete_file).fallback(not_found))
        .route("/api/logs", get(logs::get_logs).fallback(not_found))
        .route(
            "/api/version",
            get(version::get_version_info).fallback(not_found),
        )
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(abuse_guard_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string());
                    let client_ip = extract_forwarded_for(request.headers())
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(middleware::from_fn(cors_middleware))
        .layer(Extension(state.guard))
        .layer(Extension(state.credentials))
        .layer(Extension(state.storage))
        .layer(Extension(state.transfer))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(detail, "handler panicked");
    ApiError::Internal(OPERATION_FAILED.into()).into_response()
}
