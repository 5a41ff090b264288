// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了客户端在**调用处同步抛出**的各类配置错误。
//!
//! ## 设计意图
//! - **错误分类**：涵盖 URL 非法、方法与请求体组合非法、本地文件/配置/缓存文件读写失败。
//! - **边界清晰**：这里的错误只会从构建器或 `Client::send` 直接返回，永远不会进入监听器；
//!   运行期的网络失败通过 `RequestListener::on_failure` 以 `RequestError` 的形式投递。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志。

use std::fmt;

use crate::param::HttpMethod;

/// 构建或发送请求时发生的配置类异常。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 拼接后的字符串无法解析为绝对的 http/https URL。
    InvalidUrl(String),
    /// 严格模式构建或发送时请求没有 URL，且无法由 base URL 补全。
    NullUrl,
    /// 为禁止携带请求体的方法（GET、HEAD）显式设置了请求体。
    BodyNotAllowed(HttpMethod),
    /// 不支持的 HTTP 方法名。
    UnsupportedMethod(String),
    /// multipart 文件分段指向的本地文件无法读取。
    FileUnreadable(String),
    /// 配置文件无法打开或读取。
    ConfigUnreadable(String),
    /// 配置文件内容不是合法的 TOML 或取值非法。
    ConfigInvalid(String),
    /// 响应缓存文件读写失败。
    CacheIo(String),
    /// 默认传输层的运行时无法启动。
    TransportInit(String),
}

use Exception::*;

impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidUrl(url) => write!(f, "unexpected url: {}", url),
            NullUrl => write!(f, "url == null"),
            BodyNotAllowed(method) => write!(f, "method {} must not have a request body", method),
            UnsupportedMethod(method) => write!(f, "unsupported request method: {}", method),
            FileUnreadable(detail) => write!(f, "couldn't read multipart file: {}", detail),
            ConfigUnreadable(detail) => write!(f, "couldn't read config file: {}", detail),
            ConfigInvalid(detail) => write!(f, "invalid config: {}", detail),
            CacheIo(detail) => write!(f, "request cache I/O failed: {}", detail),
            TransportInit(detail) => write!(f, "couldn't start transport: {}", detail),
        }
    }
}

impl std::error::Error for Exception {}
