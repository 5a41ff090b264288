// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了 `httprequest` 客户端遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 规范化的错误字符串（既作为错误信息，也作为"已上报"的哨兵值）。
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase），用于补全空的状态行。
//! - 文件后缀名到 MIME 类型的映射表，供 multipart 文件分段推断 `Content-Type`。
//! - HTTP 方法与内容编码的强类型枚举。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::exception::Exception;

/// 客户端名称标识，用于默认的 `User-Agent`
pub const CLIENT_NAME: &str = "httprequest";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 本地响应缓存文件的默认文件名
pub const REQUEST_CACHE_DB_NAME: &str = "httprequest.db";

/// 除 200 以外被视为成功的业务状态码
pub const STATUS_DOMAIN_OK: u16 = 230;

/// 规范化的错误字符串。
///
/// 其中 `REQUEST_FAILED` 与 `NULL_CONTENTS` 还充当哨兵：传输层以这两个信息上报的失败
/// 被视为已经在上游通知过，生命周期引擎不会再次回调。
pub mod error_string {
    pub const NO_ACTIVE_INTERNET: &str = "No active internet available";
    pub const REQUEST_ERROR: &str = "Request Error";
    pub const FAILED_RESPONSE: &str = "Server return failed response";
    pub const NULL_CONTENTS: &str = "Server return null contents";
    pub const REQUEST_FAILED: &str = "Request failed";
    pub const ERROR_LOADING_DATA: &str = "Error loading data";
    pub const REQUEST_TIMEOUT: &str = "Request timeout";
    pub const CANNOT_CONNECT_TO_INTERNET: &str = "Can not connect to server";
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    /// 服务端返回的状态行缺少原因短语时，用这里的值补全。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");
        map.insert(206, "Partial Content");
        map.insert(230, "OK");

        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(413, "Content Too Large");
        map.insert(415, "Unsupported Media Type");
        map.insert(422, "Unprocessable Content");
        map.insert(429, "Too Many Requests");

        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型（Media Type）的映射表。
    ///
    /// multipart 表单中的文件分段依据这里的值设置 `Content-Type`。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("aac", "audio/aac");
        map.insert("apk", "application/vnd.android.package-archive");
        map.insert("avi", "video/x-msvideo");
        map.insert("avif", "image/avif");
        map.insert("bin", "application/octet-stream");
        map.insert("bmp", "image/bmp");
        map.insert("css", "text/css");
        map.insert("csv", "text/csv");
        map.insert("doc", "application/msword");
        map.insert(
            "docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        );
        map.insert("epub", "application/epub+zip");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("heic", "image/heic");
        map.insert("htm", "text/html");
        map.insert("html", "text/html");
        map.insert("ico", "image/x-icon");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("js", "text/javascript");
        map.insert("json", "application/json");
        map.insert("m4a", "audio/mp4");
        map.insert("mov", "video/quicktime");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("mpeg", "video/mpeg");
        map.insert("oga", "audio/ogg");
        map.insert("ogv", "video/ogg");
        map.insert("opus", "audio/opus");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("ppt", "application/vnd.ms-powerpoint");
        map.insert(
            "pptx",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        );
        map.insert("rar", "application/x-rar-compressed");
        map.insert("rtf", "application/rtf");
        map.insert("svg", "image/svg+xml");
        map.insert("tar", "application/x-tar");
        map.insert("tif", "image/tiff");
        map.insert("tiff", "image/tiff");
        map.insert("txt", "text/plain");
        map.insert("wav", "audio/wav");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("xls", "application/vnd.ms-excel");
        map.insert(
            "xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        );
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map.insert("7z", "application/x-7z-compressed");
        map
    };
}

/// 兜底 MIME 类型（通常用于无法识别后缀的二进制流）
pub const MIME_FALLBACK: &str = "application/octet-stream";

/// 标准 HTTP 请求方法，以及 WebDAV 扩展方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Move,
    PropPatch,
    Report,
    PropFind,
    MkCol,
    Lock,
}

impl HttpMethod {
    /// 该方法是否允许携带请求体。GET 与 HEAD 永远不带请求体。
    pub fn permits_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }

    /// 该方法是否必须携带请求体（可以为空）。
    pub fn requires_body(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post
                | HttpMethod::Put
                | HttpMethod::Patch
                | HttpMethod::PropPatch
                | HttpMethod::Report
        )
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Move => "MOVE",
            HttpMethod::PropPatch => "PROPPATCH",
            HttpMethod::Report => "REPORT",
            HttpMethod::PropFind => "PROPFIND",
            HttpMethod::MkCol => "MKCOL",
            HttpMethod::Lock => "LOCK",
        }
    }
}

impl fmt::Display for HttpMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Exception;

    /// 方法名大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            "MOVE" => HttpMethod::Move,
            "PROPPATCH" => HttpMethod::PropPatch,
            "REPORT" => HttpMethod::Report,
            "PROPFIND" => HttpMethod::PropFind,
            "MKCOL" => HttpMethod::MkCol,
            "LOCK" => HttpMethod::Lock,
            _ => return Err(Exception::UnsupportedMethod(s.to_string())),
        };
        Ok(method)
    }
}

/// 支持解码的响应内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

impl HttpEncoding {
    /// 解析 `Content-Encoding` 头的取值，未知编码返回 `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(HttpEncoding::Gzip),
            "deflate" => Some(HttpEncoding::Deflate),
            "br" => Some(HttpEncoding::Br),
            _ => None,
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}

/// 查询状态码的标准原因短语，未知状态码返回空串
pub fn reason_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("")
}
