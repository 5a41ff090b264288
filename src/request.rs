// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求与请求构建器
//!
//! [`RequestBuilder`] 以链式调用收集 URL、参数、请求头、请求体、标签、监听器与宿主，
//! 最终由 [`RequestBuilder::build`] 组装出不可变的 [`Request`]：
//!
//! 1. 决定目标 URL：绝对路径优先；否则把 URL（或 base URL）与路径拼接；
//! 2. 由 [`UrlComposer`] 生成最终 URL（GET 类方法把参数放进查询串）；
//! 3. 由 [`BodyComposer`] 生成请求体，并在缺少 `Content-Type` 时补齐
//!    `Content-Type` 与 `Content-Length`。
//!
//! 非严格模式下允许没有 URL，由 `Client::send` 注入 base URL 后再严格构建一次。

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use url::Url;

use crate::body::{BodyComposer, ExtensionMimeResolver, MimeResolver, RequestBody};
use crate::cache_control::CacheControl;
use crate::exception::Exception;
use crate::headers::Headers;
use crate::host::HostContext;
use crate::listener::{NullListener, RequestListener};
use crate::pairs::{ParamBag, ParamValue};
use crate::param::HttpMethod;
use crate::url_composer::UrlComposer;
use crate::util::{basic_credentials, format_path};

const CONTENT_TYPE: &str = "Content-Type";
const CONTENT_LENGTH: &str = "Content-Length";
const CACHE_CONTROL: &str = "Cache-Control";
const AUTHORIZATION: &str = "Authorization";

/// 构建完成的不可变请求
#[derive(Clone)]
pub struct Request {
    url: Option<Url>,
    method: HttpMethod,
    headers: Headers,
    body: Option<RequestBody>,
    tag: Option<String>,
    cache_control: Option<CacheControl>,
    host: Option<Arc<dyn HostContext>>,
    listener: Arc<dyn RequestListener>,
    mime_resolver: Arc<dyn MimeResolver>,
    params: ParamBag,
    queries: ParamBag,
    target: Option<String>,
    base_url: Option<String>,
    path: Option<String>,
    explicit_body: Option<RequestBody>,
    derived_headers: bool,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// 非严格构建且没有 URL 时为 `None`
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// 显式设置的缓存指令，没有时从 `Cache-Control` 头解析
    pub fn cache_control(&self) -> Option<CacheControl> {
        match &self.cache_control {
            Some(cc) => Some(cc.clone()),
            None => self.headers.get(CACHE_CONTROL).map(CacheControl::parse),
        }
    }

    pub fn host(&self) -> Option<&Arc<dyn HostContext>> {
        self.host.as_ref()
    }

    pub fn listener(&self) -> &Arc<dyn RequestListener> {
        &self.listener
    }

    pub fn params(&self) -> &ParamBag {
        &self.params
    }

    pub fn queries(&self) -> &ParamBag {
        &self.queries
    }

    /// 尚未与 base URL 拼接的路径
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// 参数指纹，作为响应缓存键的一部分
    pub fn fingerprint(&self) -> String {
        self.params.fingerprint()
    }

    /// 以当前请求的构建输入创建新的构建器。
    ///
    /// 由构建器推导出的 `Content-Type` / `Content-Length` 不会带回，重新构建时再次推导，
    /// 这样 multipart 的 boundary 与新的请求体保持一致。
    pub fn to_builder(&self) -> RequestBuilder {
        let mut headers = self.headers.clone();
        if self.derived_headers {
            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_LENGTH);
        }
        RequestBuilder {
            url: self.target.clone(),
            base_url: self.base_url.clone(),
            path: self.path.clone(),
            method: self.method,
            params: self.params.clone(),
            queries: self.queries.clone(),
            headers,
            body: self.explicit_body.clone(),
            tag: self.tag.clone(),
            cache_control: self.cache_control.clone(),
            host: self.host.clone(),
            listener: Some(Arc::clone(&self.listener)),
            mime_resolver: Arc::clone(&self.mime_resolver),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_ref().map(|u| u.as_str()))
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|b| b.content_length()))
            .field("tag", &self.tag)
            .field("host", &self.host.as_ref().map(|h| h.kind()))
            .finish()
    }
}

/// 请求构建器
#[must_use]
#[derive(Clone)]
pub struct RequestBuilder {
    url: Option<String>,
    base_url: Option<String>,
    path: Option<String>,
    method: HttpMethod,
    params: ParamBag,
    queries: ParamBag,
    headers: Headers,
    body: Option<RequestBody>,
    tag: Option<String>,
    cache_control: Option<CacheControl>,
    host: Option<Arc<dyn HostContext>>,
    listener: Option<Arc<dyn RequestListener>>,
    mime_resolver: Arc<dyn MimeResolver>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            base_url: None,
            path: None,
            method: HttpMethod::Get,
            params: ParamBag::new(),
            queries: ParamBag::new(),
            headers: Headers::new(),
            body: None,
            tag: None,
            cache_control: None,
            host: None,
            listener: None,
            mime_resolver: Arc::new(ExtensionMimeResolver),
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = non_empty(url);
        self
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = non_empty(base_url);
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = non_empty(path);
        self
    }

    /// 路径模板，`{}` 依次替换为参数
    pub fn path_fmt(self, template: &str, args: &[&dyn Display]) -> Self {
        let path = format_path(template, args);
        self.path(&path)
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn add_param<V: Into<ParamValue>>(mut self, key: &str, value: V) -> Self {
        self.params.add(key, value);
        self
    }

    /// 追加一个不做百分号编码的参数
    pub fn add_raw_param<V: Into<ParamValue>>(mut self, key: &str, value: V) -> Self {
        self.params.add_with(key, value, false);
        self
    }

    /// 批量追加参数
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ParamValue>,
    {
        for (k, v) in params {
            self.params.add(k.as_ref(), v);
        }
        self
    }

    /// 追加查询参数，不论方法都会进入 URL
    pub fn add_query<V: Into<ParamValue>>(mut self, key: &str, value: V) -> Self {
        self.queries.add(key, value);
        self
    }

    pub fn queries<I, K, V>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ParamValue>,
    {
        for (k, v) in queries {
            self.queries.add(k.as_ref(), v);
        }
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// 替换同名请求头
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// 批量替换请求头
    pub fn headers<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        for (n, v) in headers {
            self.headers.set(n.as_ref(), v.as_ref());
        }
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// 设置缓存指令；空指令集合会移除 `Cache-Control` 头
    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        if cache_control.is_empty() {
            self.headers.remove(CACHE_CONTROL);
            self.cache_control = None;
        } else {
            self.headers.set(CACHE_CONTROL, &cache_control.to_string());
            self.cache_control = Some(cache_control);
        }
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostContext>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn mime_resolver(mut self, resolver: Arc<dyn MimeResolver>) -> Self {
        self.mime_resolver = resolver;
        self
    }

    /// `Authorization: Basic <base64(user:password)>`
    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let value = basic_credentials(user, password);
        self.header(AUTHORIZATION, &value)
    }

    /// `Authorization: <scheme> <token>`
    pub fn bearer_auth(self, scheme: &str, token: &str) -> Self {
        let value = format!("{} {}", scheme, token);
        self.header(AUTHORIZATION, &value)
    }

    /// 组装请求。
    ///
    /// # 参数
    /// * `strict` - 为 `true` 时缺少 URL 返回 `Exception::NullUrl`。
    ///
    /// # 错误处理
    /// URL 非法、GET/HEAD 显式设置了请求体、multipart 文件不可读时返回对应的 `Exception`。
    pub fn build(self, strict: bool) -> Result<Request, Exception> {
        let target = self.resolve_target();
        let url = match &target {
            Some(t) => Some(UrlComposer::compose(t, self.method, &self.params, &self.queries)?),
            None if strict => return Err(Exception::NullUrl),
            None => None,
        };

        let composer = BodyComposer::new(self.mime_resolver.as_ref());
        let body = composer.compose(self.method, &self.params, self.body.as_ref())?;

        let mut headers = self.headers;
        let mut derived_headers = false;
        if let Some(b) = &body {
            if !headers.contains(CONTENT_TYPE) {
                headers.set(CONTENT_TYPE, b.content_type());
                headers.set(CONTENT_LENGTH, &b.content_length().to_string());
                derived_headers = true;
            }
        }

        Ok(Request {
            url,
            method: self.method,
            headers,
            body,
            tag: self.tag,
            cache_control: self.cache_control,
            host: self.host,
            listener: self.listener.unwrap_or_else(|| Arc::new(NullListener)),
            mime_resolver: self.mime_resolver,
            params: self.params,
            queries: self.queries,
            target: self.url,
            base_url: self.base_url,
            path: self.path,
            explicit_body: self.body,
            derived_headers,
        })
    }

    fn resolve_target(&self) -> Option<String> {
        if let Some(path) = &self.path {
            if UrlComposer::is_absolute(&UrlComposer::rewrite_websocket(path)) {
                return Some(path.clone());
            }
        }
        let base = self.url.as_ref().or(self.base_url.as_ref());
        match (base, &self.path) {
            (Some(base), Some(path)) => Some(UrlComposer::merge(base, path)),
            (Some(base), None) => Some(base.clone()),
            (None, _) => None,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{FORM_URLENCODED, MULTIPART_FORM};
    use crate::pairs::FileHandle;
    use bytes::Bytes;

    /// base URL 与带前导斜杠的路径只保留一个斜杠
    #[test]
    fn test_build_merges_base_and_path() {
        let req = RequestBuilder::new()
            .base_url("https://api.test/")
            .path("/v1/items")
            .build(true)
            .unwrap();
        assert_eq!(req.url().unwrap().as_str(), "https://api.test/v1/items");
    }

    #[test]
    fn test_absolute_path_wins() {
        let req = RequestBuilder::new()
            .base_url("https://api.test")
            .path("https://other.test/x")
            .build(true)
            .unwrap();
        assert_eq!(req.url().unwrap().host_str(), Some("other.test"));
    }

    #[test]
    fn test_websocket_scheme_rewritten() {
        let req = RequestBuilder::new().url("wss://api.test/feed").build(true).unwrap();
        assert_eq!(req.url().unwrap().scheme(), "https");
    }

    #[test]
    fn test_path_template() {
        let req = RequestBuilder::new()
            .base_url("https://api.test")
            .path_fmt("users/{}/posts", &[&42])
            .build(true)
            .unwrap();
        assert_eq!(req.url().unwrap().path(), "/users/42/posts");
    }

    /// 严格模式缺少 URL 报错，非严格模式得到部分请求
    #[test]
    fn test_missing_url() {
        let err = RequestBuilder::new().path("v1/items").build(true).unwrap_err();
        assert_eq!(err, Exception::NullUrl);
        let partial = RequestBuilder::new().path("v1/items").build(false).unwrap();
        assert!(partial.url().is_none());
        assert_eq!(partial.path(), Some("v1/items"));
    }

    #[test]
    fn test_get_params_go_to_query() {
        let req = RequestBuilder::new()
            .url("https://api.test/search")
            .add_param("q", "rust lang")
            .build(true)
            .unwrap();
        assert_eq!(req.url().unwrap().query(), Some("q=rust+lang"));
        assert!(req.body().is_none());
        assert!(req.header("Content-Type").is_none());
    }

    #[test]
    fn test_post_params_form_body_and_derived_headers() {
        let req = RequestBuilder::new()
            .url("https://api.test/login")
            .method(HttpMethod::Post)
            .add_param("user", "a b")
            .add_query("v", 2)
            .build(true)
            .unwrap();
        assert_eq!(req.url().unwrap().query(), Some("v=2"));
        let body = req.body().unwrap();
        assert_eq!(body.bytes().as_ref(), b"user=a+b");
        assert_eq!(req.header("Content-Type"), Some(FORM_URLENCODED));
        assert_eq!(req.header("Content-Length"), Some("8"));
    }

    /// 已有 Content-Type 时不再推导
    #[test]
    fn test_explicit_content_type_kept() {
        let req = RequestBuilder::new()
            .url("https://api.test/items")
            .method(HttpMethod::Put)
            .header("Content-Type", "application/json")
            .body(RequestBody::text("{}"))
            .build(true)
            .unwrap();
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert!(req.header("Content-Length").is_none());
    }

    #[test]
    fn test_get_with_body_rejected() {
        let err = RequestBuilder::new()
            .url("https://api.test/items")
            .body(RequestBody::text("x"))
            .build(true)
            .unwrap_err();
        assert_eq!(err, Exception::BodyNotAllowed(HttpMethod::Get));
    }

    #[test]
    fn test_auth_headers() {
        let req = RequestBuilder::new()
            .url("https://api.test")
            .basic_auth("user", "pwd")
            .build(true)
            .unwrap();
        assert_eq!(req.header("Authorization"), Some("Basic dXNlcjpwd2Q="));
        let req = req.to_builder().bearer_auth("Bearer", "t0k").build(true).unwrap();
        assert_eq!(req.header("Authorization"), Some("Bearer t0k"));
    }

    #[test]
    fn test_cache_control_header() {
        let req = RequestBuilder::new()
            .url("https://api.test")
            .cache_control(CacheControl::force_network())
            .build(true)
            .unwrap();
        assert_eq!(req.header("Cache-Control"), Some("no-cache"));
        assert_eq!(req.cache_control(), Some(CacheControl::force_network()));
        let req = req.to_builder().cache_control(CacheControl::default()).build(true).unwrap();
        assert!(req.header("Cache-Control").is_none());
        assert!(req.cache_control().is_none());
    }

    /// 重新构建 multipart 请求时推导的头部跟随新的 boundary
    #[test]
    fn test_to_builder_rederives_multipart_headers() {
        let req = RequestBuilder::new()
            .url("https://api.test/upload")
            .method(HttpMethod::Post)
            .add_param("file", FileHandle::from_bytes("a.txt", Bytes::from_static(b"hello")))
            .build(true)
            .unwrap();
        let first = req.header("Content-Type").unwrap().to_string();
        assert!(first.starts_with(MULTIPART_FORM));

        let rebuilt = req.to_builder().tag("again").build(true).unwrap();
        let second = rebuilt.header("Content-Type").unwrap();
        assert!(second.starts_with(MULTIPART_FORM));
        assert_ne!(first, second);
        assert_eq!(
            rebuilt.header("Content-Length").unwrap(),
            rebuilt.body().unwrap().content_length().to_string()
        );
        assert_eq!(rebuilt.fingerprint(), req.fingerprint());
    }

    #[test]
    fn test_fingerprint_uses_params_only() {
        let req = RequestBuilder::new()
            .url("https://api.test/search")
            .add_param("q", "x")
            .add_param("page", 2)
            .add_query("ts", 123)
            .build(true)
            .unwrap();
        assert_eq!(req.fingerprint(), "q=x&page=2");
    }
}
