// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求生命周期
//!
//! 每次 `Client::send` 产生一个 [`RequestCall`]，驱动如下状态机：
//!
//! ```text
//! PENDING --start--> 不可达 --> NETWORK_ERROR
//!                    可达   --> IN_FLIGHT --成功--> SUCCEEDED
//!                                         --失败--> FAILED --缓存命中--> RESCUED
//!                                         --取消--> CANCELED（不再回调）
//! ```
//!
//! ## 回调顺序
//! - 成功：`on_finish` → 写入响应缓存 → `on_success`
//! - 失败：`on_finish` → `on_failure` → 读取响应缓存 → 缓存非空时 `on_rescue`
//! - 取消：结果回调发出之前的 `cancel` 都会生效，包括在 `on_finish` 回调内部取消
//! - 网络不可达：`on_network_error`，不触发 `on_finish`
//!
//! `on_finish` 在一次调用中至多触发一次。所有回调都经过宿主分发器，
//! 宿主销毁后回调被丢弃，但状态机照常走完。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use log::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::host::Dispatcher;
use crate::listener::RequestListener;
use crate::param::error_string;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{
    CallHandle, HttpTransport, NetworkMonitor, TransportCallback, TransportError, TransportErrorKind,
    TransportRequest,
};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Rescued,
    NetworkError,
    Canceled,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallState::Pending | CallState::InFlight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 连接或读写超时
    Timeout,
    /// 传输层 I/O 错误
    Transport,
    /// 服务器返回了非成功状态码
    Http(u16),
    /// 成功状态码但响应体为空
    NullContents,
}

/// 交给 `on_failure` 的失败描述
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    kind: FailureKind,
    message: String,
}

impl RequestError {
    pub fn new(kind: FailureKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 由非成功响应生成：优先使用响应体，其次原因短语，最后是 `NULL_CONTENTS`
    pub fn from_response(response: &Response) -> Self {
        let kind = if response.is_ok_status() {
            FailureKind::NullContents
        } else {
            FailureKind::Http(response.status_code())
        };
        let message = if !response.content().is_empty() {
            String::from_utf8_lossy(response.content()).into_owned()
        } else if !response.information().is_empty() {
            response.information().to_string()
        } else {
            error_string::NULL_CONTENTS.to_string()
        };
        Self { kind, message }
    }

    fn from_transport(error: &TransportError) -> Self {
        match error.kind() {
            TransportErrorKind::Timeout => Self::new(FailureKind::Timeout, error_string::REQUEST_TIMEOUT),
            _ if error.message().is_empty() => Self::new(FailureKind::Transport, error_string::REQUEST_ERROR),
            _ => Self::new(FailureKind::Transport, error.message()),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RequestError {}

/// 一次请求调用
pub struct RequestCall {
    id: u64,
    tag: String,
    request: Arc<Request>,
    cache: Option<Arc<ResponseCache>>,
    state: Mutex<CallState>,
    finished: AtomicBool,
    handle: Mutex<Option<CallHandle>>,
    dispatcher: Dispatcher,
}

impl RequestCall {
    pub(crate) fn new(request: Request, cache: Option<Arc<ResponseCache>>) -> Arc<Self> {
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let tag = match request.tag() {
            Some(tag) => tag.to_string(),
            None => id.to_string(),
        };
        let dispatcher = Dispatcher::new(id, request.host().cloned());
        Arc::new(Self {
            id,
            tag,
            request: Arc::new(request),
            cache,
            state: Mutex::new(CallState::Pending),
            finished: AtomicBool::new(false),
            handle: Mutex::new(None),
            dispatcher,
        })
    }

    /// 宿主在发送时已销毁：直接得到已取消且不回调的调用
    pub(crate) fn dropped(request: Request) -> Arc<Self> {
        let call = Self::new(request, None);
        *call.lock_state() = CallState::Canceled;
        call.finished.store(true, Ordering::SeqCst);
        call
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 请求未设置标签时为调用 ID
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn state(&self) -> CallState {
        *self.lock_state()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 取消调用。进行中的调用转为 CANCELED，之后不再触发任何回调。
    pub fn cancel(&self) {
        {
            let mut state = self.lock_state();
            if state.is_terminal() {
                return;
            }
            *state = CallState::Canceled;
        }
        info!("[ID{}]请求被取消", self.id);
        if let Some(handle) = self.lock_handle().as_ref() {
            handle.cancel();
        }
        self.dispatcher.close();
    }

    /// 启动调用：通知开始、检查可达性、提交给传输层
    pub(crate) fn execute(self: &Arc<Self>, transport: &dyn HttpTransport, monitor: &dyn NetworkMonitor) {
        let url = match self.request.url() {
            Some(url) => url.clone(),
            None => return,
        };
        info!("[ID{}]{} {}", self.id, self.request.method(), url);
        self.emit("onStart", |listener, request| listener.on_start(request));

        if !monitor.is_network_available() {
            warn!("[ID{}]{}", self.id, error_string::NO_ACTIVE_INTERNET);
            self.set_state(CallState::NetworkError);
            self.finished.store(true, Ordering::SeqCst);
            self.emit("onNetworkError", |listener, request| listener.on_network_error(request));
            self.dispatcher.close();
            return;
        }

        // 传输层可能在 enqueue 内同步回调，先进入 IN_FLIGHT
        {
            let mut state = self.lock_state();
            if *state == CallState::Pending {
                *state = CallState::InFlight;
            }
        }
        let transport_request = TransportRequest {
            call_id: self.id,
            url,
            method: self.request.method(),
            headers: self.request.headers().clone(),
            body: self.request.body().map(|b| b.bytes().clone()),
            tag: self.tag.clone(),
        };
        let callback: Arc<dyn TransportCallback> = self.clone();
        let handle = transport.enqueue(transport_request, callback);
        if self.state() == CallState::Canceled {
            handle.cancel();
        }
        *self.lock_handle() = Some(handle);
    }

    fn succeed(&self, handle: &CallHandle, response: Response) {
        if !self.finish() {
            return;
        }
        // on_finish 的回调里可能已经取消了调用
        if !self.commit(handle, CallState::Succeeded) {
            return;
        }
        let body = response.content().clone();
        if let (Some(cache), Some(url)) = (&self.cache, self.request.url()) {
            if let Err(e) = cache.save(
                url.as_str(),
                self.request.method().as_str(),
                &self.request.fingerprint(),
                body.clone(),
            ) {
                warn!("[ID{}]写入响应缓存失败: {}", self.id, e);
            }
        }
        info!("[ID{}]请求成功: {}", self.id, response.status_code());
        self.emit("onSuccess", move |listener, request| {
            listener.on_success(request, &response, &body)
        });
        self.dispatcher.close();
    }

    fn fail(&self, handle: &CallHandle, error: RequestError) {
        if !self.finish() {
            return;
        }
        let recovered = self.rescue();
        let next = if recovered.is_some() {
            CallState::Rescued
        } else {
            CallState::Failed
        };
        if !self.commit(handle, next) {
            return;
        }
        warn!("[ID{}]请求失败: {}", self.id, error);
        self.emit("onFailure", move |listener, request| listener.on_failure(request, &error));
        if let Some(body) = recovered {
            info!("[ID{}]使用缓存响应救援，{}字节", self.id, body.len());
            self.emit("onRescue", move |listener, request| listener.on_rescue(request, &body));
        }
        self.dispatcher.close();
    }

    /// 读取同一 (URL, 方法, 参数指纹) 最近一次成功的响应体
    fn rescue(&self) -> Option<Bytes> {
        let cache = self.cache.as_ref()?;
        let url = self.request.url()?;
        cache
            .load(url.as_str(), self.request.method().as_str(), &self.request.fingerprint())
            .filter(|body| !body.is_empty())
    }

    /// 进入终态前的唯一关卡，负责触发一次 `on_finish`
    fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            debug!("[ID{}]重复的终态通知被忽略", self.id);
            return false;
        }
        self.emit("onFinish", |listener, request| listener.on_finish(request));
        true
    }

    /// 在状态锁内决定终态：调用已被取消时转入 CANCELED 并返回 `false`，
    /// 否则写入 `next`。返回 `true` 之后 `cancel` 不再生效，结果回调可以安全发出。
    fn commit(&self, handle: &CallHandle, next: CallState) -> bool {
        let mut state = self.lock_state();
        if *state == CallState::Canceled || handle.is_canceled() {
            if !state.is_terminal() {
                *state = CallState::Canceled;
            }
            drop(state);
            self.finished.store(true, Ordering::SeqCst);
            debug!("[ID{}]调用已取消，忽略传输结果", self.id);
            self.dispatcher.close();
            return false;
        }
        *state = next;
        true
    }

    /// 取消后的传输结果静默结束
    fn silenced(&self, handle: &CallHandle) -> bool {
        let canceled = *self.lock_state() == CallState::Canceled || handle.is_canceled();
        if canceled {
            self.commit(handle, CallState::Canceled);
        }
        canceled
    }

    fn emit<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&dyn RequestListener, &Request) + Send + 'static,
    {
        let request = Arc::clone(&self.request);
        self.dispatcher.dispatch(
            name,
            Box::new(move || f(request.listener().as_ref(), request.as_ref())),
        );
    }

    fn set_state(&self, next: CallState) {
        let mut state = self.lock_state();
        if *state != CallState::Canceled {
            *state = next;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CallState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => {
                warn!("[ID{}]调用状态锁已中毒，继续使用内部数据", self.id);
                poisoned.into_inner()
            }
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<CallHandle>> {
        match self.handle.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TransportCallback for RequestCall {
    fn on_failure(&self, call: &CallHandle, error: TransportError) {
        if self.silenced(call) {
            return;
        }
        if error.is_suppressed() {
            debug!("[ID{}]失败已由上游报告: {}", self.id, error);
            self.finished.store(true, Ordering::SeqCst);
            if self.commit(call, CallState::Failed) {
                self.dispatcher.close();
            }
            return;
        }
        self.fail(call, RequestError::from_transport(&error));
    }

    fn on_response(&self, call: &CallHandle, response: Response) {
        if self.silenced(call) {
            return;
        }
        if response.is_successful() {
            self.succeed(call, response);
        } else {
            self.fail(call, RequestError::from_response(&response));
        }
    }
}

impl fmt::Debug for RequestCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCall")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::request::RequestBuilder;
    use crate::transport::{MockHttpTransport, MockNetworkMonitor};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
        fn push(&self, e: String) {
            self.events.lock().unwrap().push(e);
        }
    }

    impl RequestListener for Recorder {
        fn on_start(&self, _r: &Request) {
            self.push("start".into());
        }
        fn on_finish(&self, _r: &Request) {
            self.push("finish".into());
        }
        fn on_success(&self, _r: &Request, _resp: &Response, body: &Bytes) {
            self.push(format!("success:{}", String::from_utf8_lossy(body)));
        }
        fn on_failure(&self, _r: &Request, e: &RequestError) {
            self.push(format!("failure:{}", e.message()));
        }
        fn on_rescue(&self, _r: &Request, body: &Bytes) {
            self.push(format!("rescue:{}", String::from_utf8_lossy(body)));
        }
        fn on_network_error(&self, _r: &Request) {
            self.push("network_error".into());
        }
    }

    fn request(recorder: &Arc<Recorder>) -> Request {
        RequestBuilder::new()
            .url("http://api.test/items")
            .add_param("page", 1)
            .listener(recorder.clone())
            .build(true)
            .unwrap()
    }

    fn online() -> MockNetworkMonitor {
        let mut monitor = MockNetworkMonitor::new();
        monitor.expect_is_network_available().return_const(true);
        monitor
    }

    /// 传输层在 enqueue 内同步给出响应
    fn answering(response: Response) -> MockHttpTransport {
        let mut transport = MockHttpTransport::new();
        transport.expect_enqueue().returning(move |req, cb| {
            let handle = CallHandle::new(req.call_id, &req.tag);
            cb.on_response(&handle, response.clone());
            handle
        });
        transport
    }

    fn failing(error: TransportError) -> MockHttpTransport {
        let mut transport = MockHttpTransport::new();
        transport.expect_enqueue().returning(move |req, cb| {
            let handle = CallHandle::new(req.call_id, &req.tag);
            cb.on_failure(&handle, error.clone());
            handle
        });
        transport
    }

    #[test]
    fn test_success_saves_cache() {
        let recorder = Arc::new(Recorder::default());
        let cache = Arc::new(ResponseCache::in_memory());
        let call = RequestCall::new(request(&recorder), Some(cache.clone()));
        let transport = answering(Response::from_status(200, Bytes::from_static(b"ok")));
        call.execute(&transport, &online());

        assert_eq!(call.state(), CallState::Succeeded);
        assert_eq!(recorder.events(), vec!["start", "finish", "success:ok"]);
        assert_eq!(
            cache.load("http://api.test/items?page=1", "GET", "page=1"),
            Some(Bytes::from_static(b"ok"))
        );
    }

    /// 失败后命中缓存：先 on_failure 再 on_rescue
    #[test]
    fn test_failure_rescued_from_cache() {
        let recorder = Arc::new(Recorder::default());
        let cache = Arc::new(ResponseCache::in_memory());
        cache
            .save("http://api.test/items?page=1", "GET", "page=1", Bytes::from_static(b"old"))
            .unwrap();
        let call = RequestCall::new(request(&recorder), Some(cache));
        let transport = answering(Response::new(500, "Internal Server Error", Headers::new(), Bytes::new()));
        call.execute(&transport, &online());

        assert_eq!(call.state(), CallState::Rescued);
        assert_eq!(
            recorder.events(),
            vec!["start", "finish", "failure:Internal Server Error", "rescue:old"]
        );
    }

    #[test]
    fn test_empty_body_is_failure() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        let transport = answering(Response::new(200, "", Headers::new(), Bytes::new()));
        call.execute(&transport, &online());

        let failure = format!("failure:{}", error_string::NULL_CONTENTS);
        assert_eq!(call.state(), CallState::Failed);
        assert_eq!(recorder.events(), vec!["start", "finish", failure.as_str()]);
    }

    #[test]
    fn test_timeout_message_normalized() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        call.execute(&failing(TransportError::timeout()), &online());

        assert_eq!(call.state(), CallState::Failed);
        assert_eq!(recorder.events().last().unwrap(), "failure:Request timeout");
    }

    /// 已上报的失败不再触发任何回调
    #[test]
    fn test_suppressed_failure_is_silent() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        call.execute(&failing(TransportError::io(error_string::REQUEST_FAILED)), &online());

        assert_eq!(call.state(), CallState::Failed);
        assert_eq!(recorder.events(), vec!["start"]);
    }

    #[test]
    fn test_unreachable_network_skips_transport() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        let mut monitor = MockNetworkMonitor::new();
        monitor.expect_is_network_available().return_const(false);
        let mut transport = MockHttpTransport::new();
        transport.expect_enqueue().never();
        call.execute(&transport, &monitor);

        assert_eq!(call.state(), CallState::NetworkError);
        assert_eq!(recorder.events(), vec!["start", "network_error"]);
    }

    /// 取消后迟到的传输结果被忽略
    #[test]
    fn test_cancel_before_completion_is_silent() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        let pending: Arc<Mutex<Option<(CallHandle, Arc<dyn TransportCallback>)>>> = Arc::default();
        let slot = pending.clone();
        let mut transport = MockHttpTransport::new();
        transport.expect_enqueue().returning(move |req, cb| {
            let handle = CallHandle::new(req.call_id, &req.tag);
            *slot.lock().unwrap() = Some((handle.clone(), cb));
            handle
        });
        call.execute(&transport, &online());
        assert_eq!(call.state(), CallState::InFlight);

        call.cancel();
        let (handle, cb) = pending.lock().unwrap().take().unwrap();
        assert!(handle.is_canceled());
        cb.on_response(&handle, Response::from_status(200, Bytes::from_static(b"late")));

        assert_eq!(call.state(), CallState::Canceled);
        assert_eq!(recorder.events(), vec!["start"]);
    }

    /// 在 on_finish 回调里取消调用
    struct CancelOnFinish {
        call: Mutex<Option<Arc<RequestCall>>>,
        events: Mutex<Vec<String>>,
    }

    impl RequestListener for CancelOnFinish {
        fn on_finish(&self, _r: &Request) {
            self.events.lock().unwrap().push("finish".into());
            if let Some(call) = self.call.lock().unwrap().as_ref() {
                call.cancel();
            }
        }
        fn on_success(&self, _r: &Request, _resp: &Response, body: &Bytes) {
            self.events.lock().unwrap().push(format!("success:{}", String::from_utf8_lossy(body)));
        }
        fn on_failure(&self, _r: &Request, e: &RequestError) {
            self.events.lock().unwrap().push(format!("failure:{}", e.message()));
        }
        fn on_rescue(&self, _r: &Request, body: &Bytes) {
            self.events.lock().unwrap().push(format!("rescue:{}", String::from_utf8_lossy(body)));
        }
    }

    fn holding() -> (MockHttpTransport, Arc<Mutex<Option<(CallHandle, Arc<dyn TransportCallback>)>>>) {
        let pending: Arc<Mutex<Option<(CallHandle, Arc<dyn TransportCallback>)>>> = Arc::default();
        let slot = pending.clone();
        let mut transport = MockHttpTransport::new();
        transport.expect_enqueue().returning(move |req, cb| {
            let handle = CallHandle::new(req.call_id, &req.tag);
            *slot.lock().unwrap() = Some((handle.clone(), cb));
            handle
        });
        (transport, pending)
    }

    /// on_finish 内的取消让结果回调与缓存写入都不再发生
    #[test]
    fn test_cancel_inside_on_finish_suppresses_outcome() {
        let listener = Arc::new(CancelOnFinish {
            call: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(ResponseCache::in_memory());
        let request = RequestBuilder::new()
            .url("http://api.test/items")
            .add_param("page", 1)
            .listener(listener.clone())
            .build(true)
            .unwrap();
        let call = RequestCall::new(request, Some(cache.clone()));
        *listener.call.lock().unwrap() = Some(call.clone());
        let (transport, pending) = holding();
        call.execute(&transport, &online());

        let (handle, cb) = pending.lock().unwrap().take().unwrap();
        cb.on_response(&handle, Response::from_status(200, Bytes::from_static(b"late")));

        assert_eq!(call.state(), CallState::Canceled);
        assert_eq!(*listener.events.lock().unwrap(), vec!["finish"]);
        assert!(cache.is_empty());
    }

    /// 失败路径同样如此：不发 on_failure，也不救援
    #[test]
    fn test_cancel_inside_on_finish_suppresses_rescue() {
        let listener = Arc::new(CancelOnFinish {
            call: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(ResponseCache::in_memory());
        cache
            .save("http://api.test/items?page=1", "GET", "page=1", Bytes::from_static(b"old"))
            .unwrap();
        let request = RequestBuilder::new()
            .url("http://api.test/items")
            .add_param("page", 1)
            .listener(listener.clone())
            .build(true)
            .unwrap();
        let call = RequestCall::new(request, Some(cache));
        *listener.call.lock().unwrap() = Some(call.clone());
        let (transport, pending) = holding();
        call.execute(&transport, &online());

        let (handle, cb) = pending.lock().unwrap().take().unwrap();
        cb.on_failure(&handle, TransportError::io("connection reset"));

        assert_eq!(call.state(), CallState::Canceled);
        assert_eq!(*listener.events.lock().unwrap(), vec!["finish"]);
    }

    /// 进入终态之后的取消不改变状态
    #[test]
    fn test_cancel_after_terminal_is_noop() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        call.execute(&answering(Response::from_status(200, Bytes::from_static(b"ok"))), &online());
        call.cancel();
        assert_eq!(call.state(), CallState::Succeeded);
        assert_eq!(recorder.events(), vec!["start", "finish", "success:ok"]);
    }

    #[test]
    fn test_tag_defaults_to_call_id() {
        let recorder = Arc::new(Recorder::default());
        let call = RequestCall::new(request(&recorder), None);
        assert_eq!(call.tag(), call.id().to_string());
    }

    #[test]
    fn test_error_message_prefers_body() {
        let r = Response::new(404, "Not Found", Headers::new(), Bytes::from_static(b"missing"));
        let e = RequestError::from_response(&r);
        assert_eq!(e.kind(), FailureKind::Http(404));
        assert_eq!(e.message(), "missing");
        let r = Response::new(404, "", Headers::new(), Bytes::new());
        assert_eq!(RequestError::from_response(&r).message(), error_string::NULL_CONTENTS);
    }
}
