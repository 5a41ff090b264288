// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 客户端
//!
//! [`Client`] 持有传输层、Cookie 存储、响应缓存、拦截器、base URL 与默认缓存指令，
//! 对外提供 `send` 与 `cancel_all`。客户端本身不可变，需要调整配置时通过
//! [`Client::new_builder`] 派生出新的客户端。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rustls::ClientConfig;
use url::Url;

use crate::cache::ResponseCache;
use crate::cache_control::CacheControl;
use crate::call::RequestCall;
use crate::config::Config;
use crate::cookie::{Cookie, CookieJar, MemoryCookieJar};
use crate::exception::Exception;
use crate::hyper_transport::{HyperTransport, HyperTransportConfig, DEFAULT_TIMEOUT};
use crate::listener::{EventListener, NullEventListener};
use crate::request::Request;
use crate::transport::{AlwaysOnline, Authenticator, HttpTransport, Interceptor, NetworkMonitor};
use crate::util::strip_www;

pub struct Client {
    base_url: Option<Url>,
    cookie_jar: Arc<dyn CookieJar>,
    cache: Option<Arc<ResponseCache>>,
    transport: Arc<dyn HttpTransport>,
    cache_control: Option<CacheControl>,
    application_interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    network_monitor: Arc<dyn NetworkMonitor>,
    event_listener: Arc<dyn EventListener>,
    timeout: Duration,
    worker_threads: usize,
    user_agent: Option<String>,
    tls_config: Option<Arc<ClientConfig>>,
    custom_transport: bool,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// 按配置文件组装客户端
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        ClientBuilder::from_config(config)?.build()
    }

    /// 发送请求。
    ///
    /// # 逻辑步骤
    /// 1. 请求没有 URL 但有路径时注入 base URL；没有缓存指令时注入默认指令。
    /// 2. 严格构建，仍然没有 URL 时返回 `Exception::NullUrl`。
    /// 3. 宿主已销毁：返回已取消的调用，不触发任何回调。
    /// 4. 交给生命周期引擎：通知开始、检查可达性、提交传输层。
    pub fn send(&self, request: Request) -> Result<Arc<RequestCall>, Exception> {
        let mut builder = request.to_builder();
        if request.url().is_none() && request.path().is_some() {
            if let Some(base) = &self.base_url {
                builder = builder.base_url(base.as_str());
            }
        }
        if request.cache_control().is_none() {
            if let Some(cc) = &self.cache_control {
                builder = builder.cache_control(cc.clone());
            }
        }
        if let Some(ua) = &self.user_agent {
            if !request.headers().contains("User-Agent") {
                builder = builder.header("User-Agent", ua);
            }
        }
        let request = builder.build(true)?;

        if let Some(host) = request.host() {
            if !host.is_alive() {
                debug!("宿主已销毁，请求被丢弃");
                return Ok(RequestCall::dropped(request));
            }
        }

        let call = RequestCall::new(request, self.cache.clone());
        call.execute(self.transport.as_ref(), self.network_monitor.as_ref());
        Ok(call)
    }

    /// 取消所有排队中与进行中的调用
    pub fn cancel_all(&self) {
        info!("取消全部请求");
        self.transport.cancel_all();
    }

    /// base URL 对应域名下的 Cookie，主机名开头的 `www.` 被忽略
    pub fn cookies(&self) -> HashMap<String, Cookie> {
        let base = match &self.base_url {
            Some(base) => base,
            None => return HashMap::new(),
        };
        let domain = strip_www(base.host_str().unwrap_or("")).to_ascii_lowercase();
        self.cookie_jar
            .load_for_url(base)
            .into_iter()
            .filter(|c| c.domain == domain)
            .map(|c| (c.name.clone(), c))
            .collect()
    }

    /// 清空响应缓存
    pub fn clear_request_cache(&self) -> Result<(), Exception> {
        match &self.cache {
            Some(cache) => cache.flush_all(),
            None => Ok(()),
        }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn cookie_jar(&self) -> &Arc<dyn CookieJar> {
        &self.cookie_jar
    }

    pub fn default_cache_control(&self) -> Option<&CacheControl> {
        self.cache_control.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 以当前客户端的配置创建构建器。
    ///
    /// 默认传输层不会被共享，新客户端构建时按新的配置重新创建。
    pub fn new_builder(&self) -> ClientBuilder {
        ClientBuilder {
            base_url: self.base_url.as_ref().map(|u| u.to_string()),
            cookie_jar: Arc::clone(&self.cookie_jar),
            cache: self.cache.clone(),
            transport: if self.custom_transport {
                Some(Arc::clone(&self.transport))
            } else {
                None
            },
            cache_control: self.cache_control.clone(),
            application_interceptors: self.application_interceptors.clone(),
            network_interceptors: self.network_interceptors.clone(),
            authenticator: self.authenticator.clone(),
            network_monitor: Arc::clone(&self.network_monitor),
            event_listener: Arc::clone(&self.event_listener),
            timeout: self.timeout,
            worker_threads: self.worker_threads,
            user_agent: self.user_agent.clone(),
            tls_config: self.tls_config.clone(),
        }
    }
}

#[must_use]
pub struct ClientBuilder {
    base_url: Option<String>,
    cookie_jar: Arc<dyn CookieJar>,
    cache: Option<Arc<ResponseCache>>,
    transport: Option<Arc<dyn HttpTransport>>,
    cache_control: Option<CacheControl>,
    application_interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    network_monitor: Arc<dyn NetworkMonitor>,
    event_listener: Arc<dyn EventListener>,
    timeout: Duration,
    worker_threads: usize,
    user_agent: Option<String>,
    tls_config: Option<Arc<ClientConfig>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            cookie_jar: Arc::new(MemoryCookieJar::new()),
            cache: None,
            transport: None,
            cache_control: None,
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            authenticator: None,
            network_monitor: Arc::new(AlwaysOnline),
            event_listener: Arc::new(NullEventListener),
            timeout: DEFAULT_TIMEOUT,
            worker_threads: 0,
            user_agent: None,
            tls_config: None,
        }
    }

    /// 读取配置文件中的 base URL、缓存文件、超时等设置
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let cache = match config.max_cache_records() {
            Some(max_records) => ResponseCache::open_bounded(config.cache_db(), max_records)?,
            None => ResponseCache::open(config.cache_db())?,
        };
        let mut builder = Self::new()
            .cache(Arc::new(cache))
            .timeout(Duration::from_secs(config.timeout_secs()))
            .worker_threads(config.worker_threads())
            .user_agent(config.user_agent());
        if let Some(base_url) = config.base_url() {
            builder = builder.base_url(base_url);
        }
        if let Some(cc) = config.cache_control() {
            builder = builder.cache_control(CacheControl::parse(cc));
        }
        Ok(builder)
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = if base_url.is_empty() {
            None
        } else {
            Some(base_url.to_string())
        };
        self
    }

    pub fn cookie_jar(mut self, cookie_jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = cookie_jar;
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 注入自定义传输层。此时拦截器、认证器、Cookie 存储与超时由注入方自行处理。
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = if cache_control.is_empty() {
            None
        } else {
            Some(cache_control)
        };
        self
    }

    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.application_interceptors.push(interceptor);
        self
    }

    pub fn add_network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.network_interceptors.push(interceptor);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = monitor;
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    /// 替换默认传输层的 TLS 配置，比如只信任自签名的根证书
    pub fn tls_config(mut self, tls_config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    pub fn build(self) -> Result<Client, Exception> {
        let base_url = match &self.base_url {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|_| Exception::InvalidUrl(raw.clone()))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(Exception::InvalidUrl(raw.clone()));
                }
                Some(url)
            }
            None => None,
        };

        let custom_transport = self.transport.is_some();
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut config = HyperTransportConfig {
                    timeout: self.timeout,
                    worker_threads: self.worker_threads,
                    cookie_jar: Arc::clone(&self.cookie_jar),
                    application_interceptors: self.application_interceptors.clone(),
                    network_interceptors: self.network_interceptors.clone(),
                    authenticator: self.authenticator.clone(),
                    event_listener: Arc::clone(&self.event_listener),
                    tls_config: self.tls_config.clone(),
                    ..HyperTransportConfig::default()
                };
                if let Some(ua) = &self.user_agent {
                    config.user_agent = ua.clone();
                }
                Arc::new(HyperTransport::new(config)?)
            }
        };

        Ok(Client {
            base_url,
            cookie_jar: self.cookie_jar,
            cache: self.cache,
            transport,
            cache_control: self.cache_control,
            application_interceptors: self.application_interceptors,
            network_interceptors: self.network_interceptors,
            authenticator: self.authenticator,
            network_monitor: self.network_monitor,
            event_listener: self.event_listener,
            timeout: self.timeout,
            worker_threads: self.worker_threads,
            user_agent: self.user_agent,
            tls_config: self.tls_config,
            custom_transport,
        })
    }
}
