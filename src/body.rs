//! 请求体读取与宽松 JSON 解码。

use axum::Error as AxumError;
use axum::body::{Body as AxumBody, Bytes};
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug)]
pub enum BodyError {
    TooLarge,
    Read(String),
}

/// 逐块累积请求体，超过 `limit` 字节立即中止。
pub async fn read_body_limited(body: AxumBody, limit: u64) -> Result<Bytes, BodyError> {
    let mut data_stream = BodyExt::into_data_stream(body);
    let mut buffer = Vec::new();
    while let Some(chunk) = data_stream.next().await {
        let chunk = chunk.map_err(|err: AxumError| BodyError::Read(err.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

/// 解析 JSON，失败时返回默认值，由调用方按缺失字段处理。
pub fn decode_json<T>(bytes: &[u8]) -> T
where
    T: DeserializeOwned + Default,
{
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "json body ignored");
            T::default()
        }
    }
}
