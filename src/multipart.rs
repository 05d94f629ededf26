//! multipart/form-data 解码：直接在原始字节上按分隔符切分。

use std::collections::HashMap;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";
const LINE_END: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

/// 从 Content-Type 中取出 boundary。
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (_, rest) = content_type.split_once("boundary=")?;
    let value = rest.split(';').next().unwrap_or_default().trim();
    let value = value.trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// 按 `--boundary` 切分并解析各部分。
///
/// 首段（前导）与末段（结尾）被丢弃。带 `filename` 的部分作为文件，
/// 多个文件部分时保留最后一个；仅带 `name` 的部分作为文本字段。
/// 每个部分末尾紧邻下一个分隔符的 CRLF 会被去掉。
pub fn parse_multipart(body: &[u8], boundary: &str) -> MultipartForm {
    let mut form = MultipartForm::default();
    if boundary.is_empty() {
        return form;
    }

    let delimiter = format!("--{boundary}");
    let segments = split_bytes(body, delimiter.as_bytes());
    if segments.len() < 2 {
        return form;
    }

    for segment in &segments[1..segments.len() - 1] {
        let (header, content) = match find(segment, HEADER_SEPARATOR) {
            Some(index) => (
                &segment[..index],
                &segment[index + HEADER_SEPARATOR.len()..],
            ),
            None => (*segment, &b""[..]),
        };
        let content = content.strip_suffix(LINE_END).unwrap_or(content);
        let header = String::from_utf8_lossy(header);

        if let Some(filename) = header_param(&header, "filename") {
            form.file = Some(UploadedFile {
                filename,
                data: content.to_vec(),
            });
        } else if let Some(name) = header_param(&header, "name") {
            form.fields
                .insert(name, String::from_utf8_lossy(content).into_owned());
        }
    }

    form
}

/// 查找 `key="value"`，要求 key 前不是字母数字，避免 `filename` 命中 `name`。
fn header_param(header: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let mut offset = 0;
    while let Some(found) = header[offset..].find(&pattern) {
        let start = offset + found;
        let standalone = header[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric());
        let value_start = start + pattern.len();
        if standalone {
            let value_end = header[value_start..].find('"')? + value_start;
            let value = &header[value_start..value_end];
            return if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        offset = value_start;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let first = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut index = 0;
    while index <= last_start {
        let candidate = haystack[index..=last_start]
            .iter()
            .position(|&byte| byte == first)?
            + index;
        if &haystack[candidate..candidate + needle.len()] == needle {
            return Some(candidate);
        }
        index = candidate + 1;
    }
    None
}

fn split_bytes<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(index) = find(rest, needle) {
        segments.push(&rest[..index]);
        rest = &rest[index + needle.len()..];
    }
    segments.push(rest);
    segments
}
