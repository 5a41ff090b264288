// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 传输层能力
//!
//! 核心不直接做网络 I/O，而是通过 [`HttpTransport`] 提交请求、通过 [`TransportCallback`]
//! 接收结果。默认实现见 [`crate::hyper_transport::HyperTransport`]，宿主也可以注入自己的实现
//! （例如带 TLS 与连接池的传输层）。
//!
//! 这里同时定义了交给传输层的拦截器、认证器，以及网络可达性探测能力。

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::headers::Headers;
use crate::param::{error_string, HttpMethod};
use crate::response::Response;

/// 一次传输调用的句柄，用于取消与在事件钩子中识别调用
#[derive(Debug, Clone)]
pub struct CallHandle {
    id: u64,
    tag: String,
    canceled: Arc<AtomicBool>,
}

impl CallHandle {
    pub fn new(id: u64, tag: &str) -> Self {
        Self {
            id,
            tag: tag.to_string(),
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// 标记为已取消，所有克隆共享同一个标记
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// 交给传输层的请求，只包含线路上需要的数据
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub call_id: u64,
    pub url: Url,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 连接或读写超时
    Timeout,
    /// 其他 I/O 或协议错误
    Io,
    /// 上游已经报告过的失败，不再回调
    AlreadyReported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn timeout() -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: error_string::REQUEST_TIMEOUT.to_string(),
        }
    }

    pub fn io(message: &str) -> Self {
        Self {
            kind: TransportErrorKind::Io,
            message: message.to_string(),
        }
    }

    pub fn already_reported(message: &str) -> Self {
        Self {
            kind: TransportErrorKind::AlreadyReported,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否属于"已上报"的失败。
    ///
    /// 只能携带字符串的传输层会用 `REQUEST_FAILED` / `NULL_CONTENTS` 作为信息上报，
    /// 这两种信息同样视为已上报。
    pub fn is_suppressed(&self) -> bool {
        self.kind == TransportErrorKind::AlreadyReported
            || self.message == error_string::REQUEST_FAILED
            || self.message == error_string::NULL_CONTENTS
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => TransportError::timeout(),
            _ => TransportError::io(&e.to_string()),
        }
    }
}

/// 传输层完成一次调用后的回调。回调可能发生在任意传输线程上。
pub trait TransportCallback: Send + Sync {
    fn on_failure(&self, call: &CallHandle, error: TransportError);
    fn on_response(&self, call: &CallHandle, response: Response);
}

/// 底层 HTTP 传输能力
#[cfg_attr(test, mockall::automock)]
pub trait HttpTransport: Send + Sync {
    /// 异步提交请求，立即返回调用句柄
    fn enqueue(&self, request: TransportRequest, callback: Arc<dyn TransportCallback>) -> CallHandle;
    /// 取消所有排队中与进行中的调用
    fn cancel_all(&self);
}

/// 拦截器。应用拦截器看到的是附加 Cookie 之前的请求与解码后的最终响应；
/// 网络拦截器看到的是即将写上线路的请求头与解码前的原始响应。
pub trait Interceptor: Send + Sync {
    fn intercept_request(&self, _request: &mut TransportRequest) {}
    fn intercept_response(&self, _response: &mut Response) {}
}

/// 收到 401 时提供新的 `Authorization` 取值，返回 `None` 表示放弃
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &TransportRequest, response: &Response) -> Option<String>;
}

/// 网络可达性探测
#[cfg_attr(test, mockall::automock)]
pub trait NetworkMonitor: Send + Sync {
    fn is_network_available(&self) -> bool;
}

/// 始终认为网络可用
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkMonitor for AlwaysOnline {
    fn is_network_available(&self) -> bool {
        true
    }
}

/// 由宿主根据系统网络状态广播手动切换的可达性标记
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl NetworkMonitor for ConnectivityFlag {
    fn is_network_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
