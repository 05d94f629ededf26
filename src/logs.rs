//! 日志查询接口（占位实现，不保存任何日志）。

use axum::response::Json as JsonResponse;
use serde::Serialize;

const PLACEHOLDER: &str = "Server logs - no entries available";

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    logs: &'static str,
}

pub async fn get_logs() -> JsonResponse<LogsResponse> {
    JsonResponse(LogsResponse { logs: PLACEHOLDER })
}
