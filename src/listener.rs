// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听器
//!
//! - [`RequestListener`]：请求生命周期的六个回调，全部带空的默认实现，
//!   只关心部分事件的调用方只需覆盖需要的方法。
//! - [`EventListener`]：传输层细粒度事件（DNS、连接、读写头与正文），仅用于观测，
//!   不参与生命周期状态机。

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use log::debug;

use crate::call::RequestError;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{CallHandle, TransportError};

/// 请求生命周期回调。
///
/// 保证：`on_start` 先于任何终态回调；`on_success`、`on_failure`、`on_network_error`
/// 至多触发一个；`on_rescue` 只会跟在 `on_failure` 之后。
pub trait RequestListener: Send + Sync {
    fn on_start(&self, _request: &Request) {}
    fn on_finish(&self, _request: &Request) {}
    fn on_success(&self, _request: &Request, _response: &Response, _body: &Bytes) {}
    fn on_failure(&self, _request: &Request, _error: &RequestError) {}
    fn on_rescue(&self, _request: &Request, _recovered: &Bytes) {}
    fn on_network_error(&self, _request: &Request) {}
}

/// 什么也不做的监听器，请求未设置监听器时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl RequestListener for NullListener {}

/// 传输层事件
pub trait EventListener: Send + Sync {
    fn call_start(&self, _call: &CallHandle) {}
    fn dns_start(&self, _call: &CallHandle, _domain: &str) {}
    fn dns_end(&self, _call: &CallHandle, _domain: &str, _addresses: &[SocketAddr]) {}
    fn connect_start(&self, _call: &CallHandle, _address: SocketAddr) {}
    fn secure_connect_start(&self, _call: &CallHandle) {}
    fn secure_connect_end(&self, _call: &CallHandle) {}
    fn connect_end(&self, _call: &CallHandle, _address: SocketAddr) {}
    fn connect_failed(&self, _call: &CallHandle, _address: SocketAddr, _error: &io::Error) {}
    fn request_headers_start(&self, _call: &CallHandle) {}
    fn request_headers_end(&self, _call: &CallHandle) {}
    fn request_body_start(&self, _call: &CallHandle) {}
    fn request_body_end(&self, _call: &CallHandle, _byte_count: u64) {}
    fn response_headers_start(&self, _call: &CallHandle) {}
    fn response_headers_end(&self, _call: &CallHandle, _status_code: u16) {}
    fn response_body_start(&self, _call: &CallHandle) {}
    fn response_body_end(&self, _call: &CallHandle, _byte_count: u64) {}
    fn call_end(&self, _call: &CallHandle) {}
    fn call_failed(&self, _call: &CallHandle, _error: &TransportError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventListener;

impl EventListener for NullEventListener {}

/// 以 debug 级别记录每个传输事件及其距调用开始的耗时
#[derive(Debug, Default)]
pub struct LoggingEventListener {
    started: Mutex<HashMap<u64, Instant>>,
}

impl LoggingEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, call: &CallHandle, event: &str) {
        let elapsed = match self.started.lock() {
            Ok(map) => map.get(&call.id()).map(|t| t.elapsed().as_millis()).unwrap_or(0),
            Err(poisoned) => poisoned
                .into_inner()
                .get(&call.id())
                .map(|t| t.elapsed().as_millis())
                .unwrap_or(0),
        };
        debug!("[ID{}][{}ms] {}", call.id(), elapsed, event);
    }

    fn forget(&self, call: &CallHandle) {
        if let Ok(mut map) = self.started.lock() {
            map.remove(&call.id());
        }
    }
}

impl EventListener for LoggingEventListener {
    fn call_start(&self, call: &CallHandle) {
        if let Ok(mut map) = self.started.lock() {
            map.insert(call.id(), Instant::now());
        }
        self.log(call, "callStart");
    }

    fn dns_start(&self, call: &CallHandle, domain: &str) {
        self.log(call, &format!("dnsStart: {}", domain));
    }

    fn dns_end(&self, call: &CallHandle, domain: &str, addresses: &[SocketAddr]) {
        self.log(call, &format!("dnsEnd: {} -> {:?}", domain, addresses));
    }

    fn connect_start(&self, call: &CallHandle, address: SocketAddr) {
        self.log(call, &format!("connectStart: {}", address));
    }

    fn secure_connect_start(&self, call: &CallHandle) {
        self.log(call, "secureConnectStart");
    }

    fn secure_connect_end(&self, call: &CallHandle) {
        self.log(call, "secureConnectEnd");
    }

    fn connect_end(&self, call: &CallHandle, address: SocketAddr) {
        self.log(call, &format!("connectEnd: {}", address));
    }

    fn connect_failed(&self, call: &CallHandle, address: SocketAddr, error: &io::Error) {
        self.log(call, &format!("connectFailed: {} {}", address, error));
    }

    fn request_headers_start(&self, call: &CallHandle) {
        self.log(call, "requestHeadersStart");
    }

    fn request_headers_end(&self, call: &CallHandle) {
        self.log(call, "requestHeadersEnd");
    }

    fn request_body_start(&self, call: &CallHandle) {
        self.log(call, "requestBodyStart");
    }

    fn request_body_end(&self, call: &CallHandle, byte_count: u64) {
        self.log(call, &format!("requestBodyEnd: {} bytes", byte_count));
    }

    fn response_headers_start(&self, call: &CallHandle) {
        self.log(call, "responseHeadersStart");
    }

    fn response_headers_end(&self, call: &CallHandle, status_code: u16) {
        self.log(call, &format!("responseHeadersEnd: {}", status_code));
    }

    fn response_body_start(&self, call: &CallHandle) {
        self.log(call, "responseBodyStart");
    }

    fn response_body_end(&self, call: &CallHandle, byte_count: u64) {
        self.log(call, &format!("responseBodyEnd: {} bytes", byte_count));
    }

    fn call_end(&self, call: &CallHandle) {
        self.log(call, "callEnd");
        self.forget(call);
    }

    fn call_failed(&self, call: &CallHandle, error: &TransportError) {
        self.log(call, &format!("callFailed: {}", error));
        self.forget(call);
    }
}
