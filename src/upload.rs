//! multipart 上传处理：大小校验、暂存与转发到后端。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use axum_extra::TypedHeader;
use axum_extra::headers::ContentLength;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::body::{BodyError, read_body_limited};
use crate::config::{MULTIPART_OVERHEAD, TransferConfig};
use crate::credentials::CredentialCache;
use crate::error::{ApiError, Outcome};
use crate::files::require;
use crate::multipart::{MultipartForm, boundary_from_content_type, parse_multipart};
use crate::session::StorageClient;
use crate::staging::StagedFile;

/// 上传单个文件，表单需包含 `username` 字段与一个文件部分。
pub async fn upload_file(
    Extension(storage): Extension<Arc<StorageClient>>,
    Extension(credentials): Extension<Arc<CredentialCache>>,
    Extension(transfer): Extension<Arc<TransferConfig>>,
    content_length: Option<TypedHeader<ContentLength>>,
    headers: HeaderMap,
    body: AxumBody,
) -> Result<JsonResponse<Outcome>, ApiError> {
    let max_size = transfer.max_upload_size;
    if let Some(TypedHeader(ContentLength(declared))) = content_length
        && declared > max_size
    {
        warn!(declared, max_size, "upload rejected by content-length");
        return Err(ApiError::PayloadTooLarge(max_size));
    }

    let form = decode_form(&headers, body, max_size).await?;
    let Some(file) = form.file else {
        return Err(ApiError::BadRequest("No file".into()));
    };
    if file.data.len() as u64 > max_size {
        warn!(actual = file.data.len(), max_size, "upload rejected after decode");
        return Err(ApiError::PayloadTooLarge(max_size));
    }

    let username = require(form.fields.get("username").cloned(), "Username required")?;
    let remote_name = file
        .filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string();
    if remote_name.is_empty() || remote_name == "." || remote_name == ".." {
        return Err(ApiError::BadRequest("Invalid filename".into()));
    }
    let password = credentials.password_for(&username).await;

    let staged = StagedFile::write(&transfer.staging_dir, "up", &file.data).await?;
    let bytes = storage
        .upload(&username, &password, &remote_name, staged)
        .await?;
    info!(username, filename = remote_name, bytes, "upload file");
    Ok(JsonResponse(Outcome::success()))
}

async fn decode_form(
    headers: &HeaderMap,
    body: AxumBody,
    max_size: u64,
) -> Result<MultipartForm, ApiError> {
    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(boundary_from_content_type)
    else {
        debug!("upload without multipart boundary");
        return Ok(MultipartForm::default());
    };

    let bytes = match read_body_limited(body, max_size.saturating_add(MULTIPART_OVERHEAD)).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => return Err(ApiError::PayloadTooLarge(max_size)),
        Err(BodyError::Read(err)) => return Err(ApiError::Internal(err)),
    };

    // 大请求体的切分放到阻塞线程池，避免占用异步工作线程。
    tokio::task::spawn_blocking(move || parse_multipart(&bytes, &boundary))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))
}
