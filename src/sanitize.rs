//! 后端错误信息脱敏：只返回固定的几类用户可见消息。

pub const AUTHENTICATION_FAILED: &str = "Authentication failed";
pub const SERVICE_UNAVAILABLE: &str = "Service temporarily unavailable";
pub const FILE_NOT_FOUND: &str = "File not found";
pub const PERMISSION_DENIED: &str = "Permission denied";
pub const OPERATION_FAILED: &str = "Operation failed";

/// 按优先级匹配的关键字分类表，首个命中即返回。
const CATEGORIES: &[(&[&str], &str)] = &[
    (&["ftp", "530", "login"], AUTHENTICATION_FAILED),
    (
        &["connection", "timeout", "econnrefused"],
        SERVICE_UNAVAILABLE,
    ),
    (&["no such file", "not found", "550"], FILE_NOT_FOUND),
    (&["permission", "denied"], PERMISSION_DENIED),
];

/// 将任意底层错误文本映射为安全的提示信息（不区分大小写）。
pub fn sanitize_error(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(_, message)| *message)
        .unwrap_or(OPERATION_FAILED)
}
