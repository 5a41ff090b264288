use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

use httprequest::call::CallState;
use httprequest::transport::{Authenticator, CallHandle, Interceptor, TransportRequest};
use httprequest::{
    Client, EventListener, HttpMethod, Request, RequestBuilder, RequestError, RequestListener, Response,
    ResponseCache,
};

/// 本地回环上的脚本化 HTTP 服务器：每个连接按顺序返回一段原始响应，并记录收到的请求
struct ScriptServer {
    port: u16,
    requests: mpsc::Receiver<String>,
}

enum Reply {
    Raw(Vec<u8>),
    /// 读完请求后保持连接但不回应
    Silent(Duration),
    /// 不读请求，接受连接后直接写出并关闭
    Blind(Vec<u8>),
}

impl ScriptServer {
    fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for reply in replies {
                let (mut stream, _) = match listener.accept() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                if let Reply::Blind(bytes) = &reply {
                    let _ = stream.write_all(bytes);
                    continue;
                }
                let request = read_request(&mut stream);
                let _ = tx.send(request);
                match reply {
                    Reply::Raw(bytes) => {
                        let _ = stream.write_all(&bytes);
                    }
                    Reply::Silent(hold) => thread::sleep(hold),
                    Reply::Blind(_) => {}
                }
            }
        });
        Self { port, requests: rx }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    fn next_request(&self) -> String {
        self.requests.recv_timeout(Duration::from_secs(5)).unwrap()
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn reply(status: &str, headers: &[&str], body: &[u8]) -> Reply {
    let mut raw = format!("HTTP/1.1 {}\r\n", status);
    for h in headers {
        raw.push_str(h);
        raw.push_str("\r\n");
    }
    raw.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = raw.into_bytes();
    bytes.extend_from_slice(body);
    Reply::Raw(bytes)
}

/// 把终态事件转发到通道
struct Waiter(Mutex<mpsc::Sender<String>>);

impl Waiter {
    fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self(Mutex::new(tx))), rx)
    }

    fn send(&self, event: String) {
        let _ = self.0.lock().unwrap().send(event);
    }
}

impl RequestListener for Waiter {
    fn on_success(&self, _request: &Request, _response: &Response, body: &Bytes) {
        self.send(format!("success:{}", String::from_utf8_lossy(body)));
    }
    fn on_failure(&self, _request: &Request, error: &RequestError) {
        self.send(format!("failure:{}", error.message()));
    }
    fn on_rescue(&self, _request: &Request, body: &Bytes) {
        self.send(format!("rescue:{}", String::from_utf8_lossy(body)));
    }
}

fn wait(rx: &mpsc::Receiver<String>) -> String {
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn get(path: &str, listener: &Arc<Waiter>) -> Request {
    RequestBuilder::new()
        .path(path)
        .add_param("x", 1)
        .listener(listener.clone())
        .build(false)
        .unwrap()
}

fn client_for(server: &ScriptServer) -> Client {
    Client::builder()
        .base_url(&server.base_url())
        .cache(Arc::new(ResponseCache::in_memory()))
        .worker_threads(2)
        .build()
        .unwrap()
}

#[test]
fn test_get_with_content_length() {
    let server = ScriptServer::start(vec![reply("200 OK", &["Content-Type: application/json"], b"{\"n\":1}")]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    let call = client.send(get("/items", &waiter)).unwrap();

    assert_eq!(wait(&rx), "success:{\"n\":1}");
    assert_eq!(call.state(), CallState::Succeeded);
    let request = server.next_request();
    assert!(request.starts_with("GET /items?x=1 HTTP/1.1\r\n"));
    assert!(request.contains(&format!("Host: 127.0.0.1:{}\r\n", server.port)));
    assert!(request.contains("Accept-Encoding: gzip, deflate, br\r\n"));
    assert!(request.contains("Connection: close\r\n"));
}

#[test]
fn test_chunked_gzip_body_decoded() {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(b"compressed payload").unwrap();
    let gz = gz.finish().unwrap();
    let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n".to_vec();
    let (first, second) = gz.split_at(gz.len() / 2);
    for part in [first, second] {
        raw.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        raw.extend_from_slice(part);
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"0\r\n\r\n");

    let server = ScriptServer::start(vec![Reply::Raw(raw)]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    client.send(get("/gz", &waiter)).unwrap();
    assert_eq!(wait(&rx), "success:compressed payload");
}

/// 500 响应以响应体作为错误信息，并从缓存救援
#[test]
fn test_server_error_rescued() {
    let server = ScriptServer::start(vec![
        reply("200 OK", &[], b"cached"),
        reply("500 Internal Server Error", &[], b"boom"),
    ]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    client.send(get("/items", &waiter)).unwrap();
    assert_eq!(wait(&rx), "success:cached");

    let call = client.send(get("/items", &waiter)).unwrap();
    assert_eq!(wait(&rx), "failure:boom");
    assert_eq!(wait(&rx), "rescue:cached");
    assert_eq!(call.state(), CallState::Rescued);
}

#[test]
fn test_timeout_reported() {
    let server = ScriptServer::start(vec![Reply::Silent(Duration::from_secs(3))]);
    let client = Client::builder()
        .base_url(&server.base_url())
        .timeout(Duration::from_millis(300))
        .worker_threads(1)
        .build()
        .unwrap();
    let (waiter, rx) = Waiter::new();
    client.send(get("/slow", &waiter)).unwrap();
    assert_eq!(wait(&rx), "failure:Request timeout");
}

/// 记录安全连接相关的事件
#[derive(Default)]
struct TlsEvents(Mutex<Vec<&'static str>>);

impl EventListener for TlsEvents {
    fn secure_connect_start(&self, _call: &CallHandle) {
        self.0.lock().unwrap().push("secure_connect_start");
    }
    fn secure_connect_end(&self, _call: &CallHandle) {
        self.0.lock().unwrap().push("secure_connect_end");
    }
}

/// https 地址走 TLS 握手，对端不讲 TLS 时握手失败并经 on_failure 上报
#[test]
fn test_https_handshake_failure_reported() {
    let server = ScriptServer::start(vec![Reply::Blind(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec())]);
    let events = Arc::new(TlsEvents::default());
    let client = Client::builder()
        .event_listener(events.clone())
        .worker_threads(1)
        .build()
        .unwrap();
    let (waiter, rx) = Waiter::new();
    let request = RequestBuilder::new()
        .url(&format!("https://127.0.0.1:{}/", server.port))
        .listener(waiter.clone())
        .build(true)
        .unwrap();
    let call = client.send(request).unwrap();

    assert!(wait(&rx).starts_with("failure:"));
    assert_eq!(call.state(), CallState::Failed);
    assert_eq!(*events.0.lock().unwrap(), vec!["secure_connect_start"]);
}

/// 超大的 Max-Age 不影响响应的正常交付
#[test]
fn test_overflowing_max_age_cookie() {
    let server = ScriptServer::start(vec![reply(
        "200 OK",
        &["Set-Cookie: a=1; Max-Age=99999999999999", "Set-Cookie: b=2; Expires=not a date"],
        b"ok",
    )]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    let call = client.send(get("/cookies", &waiter)).unwrap();

    assert_eq!(wait(&rx), "success:ok");
    assert_eq!(call.state(), CallState::Succeeded);
    let cookies = client.cookies();
    assert_eq!(cookies["a"].value, "1");
    assert_eq!(cookies["b"].value, "2");
}

struct Exploding;

impl Interceptor for Exploding {
    fn intercept_request(&self, _request: &mut TransportRequest) {
        panic!("interceptor failed");
    }
}

/// 传输任务 panic 时请求仍以失败结束
#[test]
fn test_task_panic_becomes_failure() {
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")
        .add_interceptor(Arc::new(Exploding))
        .worker_threads(1)
        .build()
        .unwrap();
    let (waiter, rx) = Waiter::new();
    let call = client.send(get("/boom", &waiter)).unwrap();

    assert_eq!(wait(&rx), "failure:transport task panicked");
    assert_eq!(call.state(), CallState::Failed);
}

#[test]
fn test_cookies_stored_and_sent() {
    let server = ScriptServer::start(vec![
        reply("200 OK", &["Set-Cookie: sid=abc; Path=/"], b"first"),
        reply("200 OK", &[], b"second"),
    ]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    client.send(get("/login", &waiter)).unwrap();
    assert_eq!(wait(&rx), "success:first");
    assert!(!server.next_request().contains("Cookie:"));

    client.send(get("/me", &waiter)).unwrap();
    assert_eq!(wait(&rx), "success:second");
    assert!(server.next_request().contains("Cookie: sid=abc\r\n"));
    assert_eq!(client.cookies()["sid"].value, "abc");
}

struct StaticToken;

impl Authenticator for StaticToken {
    fn authenticate(&self, _request: &TransportRequest, _response: &Response) -> Option<String> {
        Some("Bearer retry-token".to_string())
    }
}

struct TraceHeader;

impl Interceptor for TraceHeader {
    fn intercept_request(&self, request: &mut TransportRequest) {
        request.headers.set("X-Trace", "t-1");
    }
}

/// 401 后携带认证器提供的凭据重试一次
#[test]
fn test_authenticator_retries_once() {
    let server = ScriptServer::start(vec![
        reply("401 Unauthorized", &["WWW-Authenticate: Bearer"], b""),
        reply("200 OK", &[], b"welcome"),
    ]);
    let client = Client::builder()
        .base_url(&server.base_url())
        .authenticator(Arc::new(StaticToken))
        .add_interceptor(Arc::new(TraceHeader))
        .worker_threads(1)
        .build()
        .unwrap();
    let (waiter, rx) = Waiter::new();
    client.send(get("/private", &waiter)).unwrap();
    assert_eq!(wait(&rx), "success:welcome");

    let first = server.next_request();
    let second = server.next_request();
    assert!(first.contains("X-Trace: t-1\r\n"));
    assert!(!first.contains("Authorization"));
    assert!(second.contains("Authorization: Bearer retry-token\r\n"));
}

#[test]
fn test_post_form_body_sent() {
    let server = ScriptServer::start(vec![reply("201 Created", &[], b"created")]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    let request = RequestBuilder::new()
        .path("/items")
        .method(HttpMethod::Post)
        .add_param("name", "a b")
        .listener(waiter.clone())
        .build(false)
        .unwrap();
    client.send(request).unwrap();

    // 201 不在成功集合内
    assert_eq!(wait(&rx), "failure:created");
    let request = server.next_request();
    assert!(request.starts_with("POST /items HTTP/1.1\r\n"));
    assert!(request.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
    assert!(request.ends_with("\r\n\r\nname=a+b"));
}

#[test]
fn test_cancel_all_is_silent() {
    let server = ScriptServer::start(vec![Reply::Silent(Duration::from_secs(2))]);
    let client = client_for(&server);
    let (waiter, rx) = Waiter::new();
    let call = client.send(get("/hold", &waiter)).unwrap();
    server.next_request();

    client.cancel_all();
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    assert_eq!(call.state(), CallState::Canceled);
}
