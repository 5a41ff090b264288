// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 基于 hyper 的默认传输层
//!
//! [`HyperTransport`] 在自有的多线程运行时上完成 HTTP/1.1 请求：
//! - 每个调用一个连接，DNS 与 TCP 连接由带事件钩子的连接器完成；
//! - `https` 地址经 rustls 握手，证书按系统根证书校验，可通过 [`HyperTransportConfig::tls_config`] 替换；
//! - 报文的写出与分帧解析交给 hyper；
//! - 请求默认声明 `Accept-Encoding: gzip, deflate, br`，响应按 `Content-Encoding` 解压；
//! - 应用/网络拦截器、Cookie 存储、401 认证重试与事件钩子都在这里生效；
//! - 整个调用受超时约束，超时以 `TransportErrorKind::Timeout` 上报。
//!
//! 单个调用的任务若发生 panic，以传输错误经 `on_failure` 上报，不会丢失回调。

use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use brotli::Decompressor;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::{Method, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::ext::ReasonPhrase;
use hyper_rustls::{HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};
use url::Url;

use crate::cookie::{Cookie, CookieJar, MemoryCookieJar};
use crate::exception::Exception;
use crate::headers::Headers;
use crate::listener::{EventListener, NullEventListener};
use crate::param::{error_string, HttpEncoding, CLIENT_NAME};
use crate::response::Response;
use crate::transport::{
    Authenticator, CallHandle, HttpTransport, Interceptor, TransportCallback, TransportError,
    TransportRequest,
};

/// 默认的请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// 传输层的组装参数
#[derive(Clone)]
pub struct HyperTransportConfig {
    pub timeout: Duration,
    /// 为 0 时使用 CPU 核数
    pub worker_threads: usize,
    pub user_agent: String,
    pub cookie_jar: Arc<dyn CookieJar>,
    pub application_interceptors: Vec<Arc<dyn Interceptor>>,
    pub network_interceptors: Vec<Arc<dyn Interceptor>>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub event_listener: Arc<dyn EventListener>,
    /// 为空时使用系统根证书
    pub tls_config: Option<Arc<ClientConfig>>,
}

impl Default for HyperTransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            worker_threads: 0,
            user_agent: format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")),
            cookie_jar: Arc::new(MemoryCookieJar::new()),
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            authenticator: None,
            event_listener: Arc::new(NullEventListener),
            tls_config: None,
        }
    }
}

pub struct HyperTransport {
    runtime: Option<Runtime>,
    inner: Arc<Inner>,
}

struct Inner {
    config: HyperTransportConfig,
    tls: Arc<ClientConfig>,
    calls: Mutex<HashMap<u64, (CallHandle, Arc<Notify>)>>,
}

impl HyperTransport {
    pub fn new(config: HyperTransportConfig) -> Result<Self, Exception> {
        let tls = match &config.tls_config {
            Some(tls) => Arc::clone(tls),
            None => Arc::new(native_roots_config()?),
        };
        let worker_threads = match config.worker_threads {
            0 => num_cpus::get(),
            n => n,
        };
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("httprequest-transport")
            .enable_all()
            .build()
            .map_err(|e| Exception::TransportInit(e.to_string()))?;
        debug!("传输层运行时已启动，工作线程数：{}", worker_threads);
        Ok(Self {
            runtime: Some(runtime),
            inner: Arc::new(Inner {
                config,
                tls,
                calls: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// 尚未结束的调用数
    pub fn in_flight(&self) -> usize {
        self.inner.lock_calls().len()
    }
}

/// 以系统根证书构造 rustls 客户端配置，找不到根证书时退化为空的信任库
pub fn native_roots_config() -> Result<ClientConfig, Exception> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("读取系统根证书出错: {}", e);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        warn!("没有可用的系统根证书，https 请求将无法通过证书校验");
    } else {
        debug!("已加载{}个系统根证书，忽略{}个", added, ignored);
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Exception::TransportInit(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

impl HttpTransport for HyperTransport {
    fn enqueue(&self, request: TransportRequest, callback: Arc<dyn TransportCallback>) -> CallHandle {
        let handle = CallHandle::new(request.call_id, &request.tag);
        let runtime = match &self.runtime {
            Some(runtime) => runtime,
            None => {
                callback.on_failure(&handle, TransportError::io("transport is shut down"));
                return handle;
            }
        };
        let notify = Arc::new(Notify::new());
        self.inner
            .lock_calls()
            .insert(handle.id(), (handle.clone(), Arc::clone(&notify)));

        let inner = Arc::clone(&self.inner);
        let task_handle = handle.clone();
        runtime.spawn(async move {
            inner.run(task_handle, request, notify, callback).await;
        });
        handle
    }

    fn cancel_all(&self) {
        let calls: Vec<_> = self.inner.lock_calls().drain().map(|(_, v)| v).collect();
        debug!("取消{}个进行中的调用", calls.len());
        for (handle, notify) in calls {
            handle.cancel();
            notify.notify_one();
        }
    }
}

impl Drop for HyperTransport {
    fn drop(&mut self) {
        // 可能在运行时自己的线程上被释放，不能阻塞等待
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        handle: CallHandle,
        request: TransportRequest,
        notify: Arc<Notify>,
        callback: Arc<dyn TransportCallback>,
    ) {
        let events = Arc::clone(&self.config.event_listener);
        events.call_start(&handle);

        // 单独的任务里执行，panic 只会结束该任务，结果仍要回调出去
        let task = tokio::spawn(Arc::clone(&self).execute(handle.clone(), request));
        let abort = task.abort_handle();
        let outcome = tokio::select! {
            _ = notify.notified() => {
                abort.abort();
                Err(TransportError::io("Canceled"))
            }
            joined = tokio::time::timeout(self.config.timeout, task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_panic() => {
                    warn!("[ID{}]传输任务 panic", handle.id());
                    Err(TransportError::io("transport task panicked"))
                }
                Ok(Err(e)) => Err(TransportError::io(&e.to_string())),
                Err(_) => {
                    abort.abort();
                    Err(TransportError::timeout())
                }
            }
        };
        self.lock_calls().remove(&handle.id());

        match &outcome {
            Ok(_) => events.call_end(&handle),
            Err(error) => {
                debug!("[ID{}]传输失败: {}", handle.id(), error);
                events.call_failed(&handle, error);
            }
        }
        // 监听器与缓存写入都是阻塞操作，交给阻塞线程池
        let delivered = tokio::task::spawn_blocking(move || match outcome {
            Ok(response) => callback.on_response(&handle, response),
            Err(error) => callback.on_failure(&handle, error),
        })
        .await;
        if let Err(e) = delivered {
            warn!("传输回调异常退出: {}", e);
        }
    }

    async fn execute(self: Arc<Self>, handle: CallHandle, mut request: TransportRequest) -> Result<Response, TransportError> {
        for interceptor in &self.config.application_interceptors {
            interceptor.intercept_request(&mut request);
        }

        let cookies = self.config.cookie_jar.load_for_url(&request.url);
        if !cookies.is_empty() && !request.headers.contains("Cookie") {
            let value = cookies.iter().map(Cookie::pair).collect::<Vec<_>>().join("; ");
            request.headers.set("Cookie", &value);
        }

        let mut response = self.exchange(&handle, &request).await?;
        if response.status_code() == 401 {
            if let Some(authenticator) = &self.config.authenticator {
                if let Some(credentials) = authenticator.authenticate(&request, &response) {
                    if request.headers.get("Authorization") != Some(credentials.as_str()) {
                        debug!("[ID{}]收到401，携带新凭据重试", handle.id());
                        request.headers.set("Authorization", &credentials);
                        response = self.exchange(&handle, &request).await?;
                    }
                }
            }
        }

        for interceptor in &self.config.application_interceptors {
            interceptor.intercept_response(&mut response);
        }
        Ok(response)
    }

    /// 一次完整的连接、写请求、读响应
    async fn exchange(&self, handle: &CallHandle, request: &TransportRequest) -> Result<Response, TransportError> {
        let events = &self.config.event_listener;
        let https = match request.url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(TransportError::io(&format!("unsupported scheme: {}", other))),
        };

        let mut wire = request.clone();
        self.prepare_headers(&mut wire);
        for interceptor in &self.config.network_interceptors {
            interceptor.intercept_request(&mut wire);
        }

        let target = origin_uri(&wire.url)?;
        let connector = TracingConnector {
            handle: handle.clone(),
            events: Arc::clone(events),
        };
        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config((*self.tls).clone())
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);
        let io = https_connector
            .oneshot(target.clone())
            .await
            .map_err(|e| TransportError::io(&e.to_string()))?;
        if https {
            if let MaybeHttpsStream::Https(_) = &io {
                events.secure_connect_end(handle);
            }
        }

        let mut builder = http1::Builder::new();
        builder.title_case_headers(true);
        let (mut sender, connection) = builder
            .handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(hyper_error)?;
        let id = handle.id();
        let _driver = AbortOnDrop(tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("[ID{}]连接结束: {}", id, e);
            }
        }));

        let method = Method::from_bytes(wire.method.as_str().as_bytes())
            .map_err(|e| TransportError::io(&e.to_string()))?;
        let mut outgoing = http::Request::builder().method(method).uri(path_and_query(&target));
        for (name, value) in wire.headers.iter() {
            outgoing = outgoing.header(name, value);
        }
        let body_len = wire.body.as_ref().map(|b| b.len() as u64);
        let outgoing = outgoing
            .body(Full::new(wire.body.clone().unwrap_or_default()))
            .map_err(|e| TransportError::io(&e.to_string()))?;

        events.request_headers_start(handle);
        if body_len.is_some() {
            events.request_body_start(handle);
        }
        let incoming = sender.send_request(outgoing).await.map_err(hyper_error)?;
        events.request_headers_end(handle);
        if let Some(len) = body_len {
            events.request_body_end(handle, len);
        }

        events.response_headers_start(handle);
        let (parts, body) = incoming.into_parts();
        let status = parts.status.as_u16();
        let reason = match parts.extensions.get::<ReasonPhrase>() {
            Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
            None => parts.status.canonical_reason().unwrap_or("").to_string(),
        };
        let mut headers = Headers::new();
        for (name, value) in parts.headers.iter() {
            headers.add(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
        events.response_headers_end(handle, status);

        events.response_body_start(handle);
        let content = body.collect().await.map_err(hyper_error)?.to_bytes();
        events.response_body_end(handle, content.len() as u64);

        let mut response = Response::new(status, &reason, headers, content);
        for interceptor in &self.config.network_interceptors {
            interceptor.intercept_response(&mut response);
        }
        self.save_cookies(&request.url, &response);
        decode_response(&mut response)?;
        Ok(response)
    }

    fn prepare_headers(&self, wire: &mut TransportRequest) {
        if !wire.headers.contains("Host") {
            let host = wire.url.host_str().unwrap_or("").to_string();
            let value = match wire.url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            };
            wire.headers.set("Host", &value);
        }
        if !wire.headers.contains("User-Agent") {
            wire.headers.set("User-Agent", &self.config.user_agent);
        }
        if !wire.headers.contains("Accept-Encoding") {
            wire.headers.set("Accept-Encoding", ACCEPT_ENCODING);
        }
        wire.headers.set("Connection", "close");
        if let Some(body) = &wire.body {
            if !wire.headers.contains("Content-Length") {
                wire.headers.set("Content-Length", &body.len().to_string());
            }
        }
    }

    fn save_cookies(&self, url: &Url, response: &Response) {
        let cookies: Vec<Cookie> = response
            .headers()
            .get_all("Set-Cookie")
            .into_iter()
            .filter_map(|value| Cookie::parse(url, value))
            .collect();
        if !cookies.is_empty() {
            self.config.cookie_jar.save_from_url(url, cookies);
        }
    }

    fn lock_calls(&self) -> MutexGuard<'_, HashMap<u64, (CallHandle, Arc<Notify>)>> {
        match self.calls.lock() {
            Ok(calls) => calls,
            Err(poisoned) => {
                warn!("调用表锁已中毒，继续使用内部数据");
                poisoned.into_inner()
            }
        }
    }
}

/// 解析域名并逐个地址尝试连接，沿途触发 DNS 与连接事件
#[derive(Clone)]
struct TracingConnector {
    handle: CallHandle,
    events: Arc<dyn EventListener>,
}

impl Service<Uri> for TracingConnector {
    type Response = TokioIo<TcpStream>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(self.clone().connect(uri))
    }
}

impl TracingConnector {
    async fn connect(self, uri: Uri) -> io::Result<TokioIo<TcpStream>> {
        let https = uri.scheme_str() == Some("https");
        let host = match uri.host() {
            // IPv6 字面量带方括号
            Some(h) => h.trim_start_matches('[').trim_end_matches(']').to_string(),
            None => return Err(io::Error::new(io::ErrorKind::InvalidInput, "request url has no host")),
        };
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        self.events.dns_start(&self.handle, &host);
        let addresses: Vec<SocketAddr> = lookup_host((host.as_str(), port)).await?.collect();
        self.events.dns_end(&self.handle, &host, &addresses);

        for address in &addresses {
            self.events.connect_start(&self.handle, *address);
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    self.events.connect_end(&self.handle, *address);
                    stream.set_nodelay(true)?;
                    if https {
                        self.events.secure_connect_start(&self.handle);
                    }
                    return Ok(TokioIo::new(stream));
                }
                Err(e) => self.events.connect_failed(&self.handle, *address, &e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            error_string::CANNOT_CONNECT_TO_INTERNET,
        ))
    }
}

/// 交换结束时停止连接驱动任务
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn origin_uri(url: &Url) -> Result<Uri, TransportError> {
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| TransportError::io(&format!("invalid request url {}: {}", url, e)))
}

fn path_and_query(uri: &Uri) -> String {
    match uri.path_and_query() {
        Some(pq) => pq.as_str().to_string(),
        None => "/".to_string(),
    }
}

fn hyper_error(e: hyper::Error) -> TransportError {
    match e.source() {
        Some(source) => TransportError::io(&format!("{}: {}", e, source)),
        None => TransportError::io(&e.to_string()),
    }
}

/// 按 `Content-Encoding` 解压响应体
fn decode_response(response: &mut Response) -> Result<(), TransportError> {
    let encoding = match response.headers().get("Content-Encoding").and_then(HttpEncoding::parse) {
        Some(e) => e,
        None => return Ok(()),
    };
    if response.content().is_empty() {
        return Ok(());
    }
    let decoded = decompress(response.content(), encoding)
        .map_err(|e| TransportError::io(&format!("couldn't decode {} body: {}", encoding, e)))?;
    response.set_content(Bytes::from(decoded));
    response.headers_mut().remove("Content-Encoding");
    response.headers_mut().remove("Content-Length");
    Ok(())
}

fn decompress(data: &[u8], encoding: HttpEncoding) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        HttpEncoding::Gzip => {
            GzDecoder::new(data).read_to_end(&mut out)?;
        }
        HttpEncoding::Deflate => {
            // 规范要求 zlib 封装，但不少服务器发送原始 deflate 流
            if ZlibDecoder::new(data).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        HttpEncoding::Br => {
            Decompressor::new(data, 4096).read_to_end(&mut out)?;
        }
    }
    Ok(out)
}
