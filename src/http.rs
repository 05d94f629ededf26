//! HTTP 辅助工具：客户端标识、CORS 与通用响应头。

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

const ALLOW_METHODS: &str = "GET,POST,DELETE,OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type,x-delete-token,x-logs-token,ngrok-skip-browser-warning";

/// 从 `x-forwarded-for` 取第一个地址。
pub fn extract_forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// 计算限流使用的客户端标识：转发头优先，其次连接地址，最后为 `unknown`。
pub fn client_identity<B>(req: &Request<B>) -> String {
    extract_forwarded_for(req.headers())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// 为所有响应添加宽松的 CORS 头；OPTIONS 直接返回空 200。
pub async fn cors_middleware(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(
            extract_forwarded_for(&headers).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn identity_falls_back_to_socket_then_unknown() {
        let mut req = Request::new(());
        assert_eq!(client_identity(&req), "unknown");

        let addr: SocketAddr = "192.0.2.10:5555".parse().expect("addr");
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_identity(&req), "192.0.2.10");

        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_identity(&req), "198.51.100.1");
    }
}
