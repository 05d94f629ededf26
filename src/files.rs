//! 文件列表、下载与删除处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::config::TransferConfig;
use crate::credentials::CredentialCache;
use crate::error::{ApiError, Outcome};
use crate::session::{RemoteEntry, StorageClient};
use crate::staging::StagedFile;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileQuery {
    username: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
    filename: String,
    size: u64,
    uploaded_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    files: Vec<FileSummary>,
}

impl From<RemoteEntry> for FileSummary {
    fn from(entry: RemoteEntry) -> Self {
        let uploaded_at = entry.modified.map(|ts| {
            DateTime::<Utc>::from(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
        });
        Self {
            filename: entry.name,
            size: entry.size,
            uploaded_at,
        }
    }
}

pub(crate) fn require(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.into()))
}

/// 列出用户远端目录。
pub async fn list_files(
    Query(query): Query<FileQuery>,
    Extension(storage): Extension<Arc<StorageClient>>,
    Extension(credentials): Extension<Arc<CredentialCache>>,
) -> Result<JsonResponse<FileList>, ApiError> {
    let username = require(query.username, "Username required")?;
    let password = credentials.password_for(&username).await;

    let entries = storage.list(&username, &password).await?;
    info!(username, count = entries.len(), "list files");
    Ok(JsonResponse(FileList {
        files: entries.into_iter().map(FileSummary::from).collect(),
    }))
}

/// 下载文件：先暂存到本地，再以附件形式流式返回，发送结束后删除暂存文件。
pub async fn download_file(
    Query(query): Query<FileQuery>,
    Extension(storage): Extension<Arc<StorageClient>>,
    Extension(credentials): Extension<Arc<CredentialCache>>,
    Extension(transfer): Extension<Arc<TransferConfig>>,
) -> Result<Response, ApiError> {
    let username = require(query.username, "Username required")?;
    let filename = require(query.filename, "Filename required")?;
    let password = credentials.password_for(&username).await;

    let staged = StagedFile::allocate(&transfer.staging_dir, "dl");
    let (staged, size) = storage
        .download(&username, &password, &filename, staged)
        .await?;
    let file = File::open(staged.path()).await?;
    info!(username, filename, size, "download file");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename)?);
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&size.to_string())
            .map_err(|_| ApiError::Internal("header build failed".into()))?,
    );

    // 响应体持有暂存文件，流结束或被丢弃时删除。
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _staged = &staged;
        chunk
    });
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// 删除远端文件。
pub async fn delete_file(
    Query(query): Query<FileQuery>,
    Extension(storage): Extension<Arc<StorageClient>>,
    Extension(credentials): Extension<Arc<CredentialCache>>,
) -> Result<JsonResponse<Outcome>, ApiError> {
    let username = require(query.username, "Username required")?;
    let filename = require(query.filename, "Filename required")?;
    let password = credentials.password_for(&username).await;

    storage.delete(&username, &password, &filename).await?;
    info!(username, filename, "delete file");
    Ok(JsonResponse(Outcome::success()))
}

fn content_disposition(filename: &str) -> Result<HeaderValue, ApiError> {
    let safe: String = filename
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    HeaderValue::from_bytes(format!("attachment; filename=\"{safe}\"").as_bytes())
        .map_err(|_| ApiError::Internal("header build failed".into()))
}
