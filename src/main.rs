// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 命令行示例
//!
//! 读取 `config/development.toml` 组装客户端，把命令行给出的每个 URL（或相对 base URL 的路径）
//! 作为 GET 请求发送，并打印生命周期回调：
//!
//! ```text
//! httprequest /get https://example.com/ /status/500
//! ```
//!
//! 回调在后台宿主的工作线程上执行，主线程等待所有调用进入终态后退出。

use std::collections::HashMap;
use std::env;
use std::process;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{error, info, warn};

use httprequest::call::CallState;
use httprequest::url_composer::UrlComposer;
use httprequest::{
    BackgroundHost, ClientBuilder, Config, HostContext, LoggingEventListener, Request, RequestBuilder,
    RequestError, RequestListener, Response,
};

/// 终态事件
enum Outcome {
    Success,
    Failure,
    Rescue,
    NetworkError,
}

struct PrintingListener {
    events: Mutex<Sender<(String, Outcome)>>,
}

impl PrintingListener {
    fn notify(&self, request: &Request, outcome: Outcome) {
        let tag = request.tag().unwrap_or("").to_string();
        let sender = match self.events.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sender.send((tag, outcome));
    }
}

impl RequestListener for PrintingListener {
    fn on_start(&self, request: &Request) {
        println!("-> {} {}", request.method(), url_of(request));
    }

    fn on_success(&self, request: &Request, response: &Response, body: &Bytes) {
        println!(
            "<- {} {} {}，{}字节",
            url_of(request),
            response.status_code(),
            response.information(),
            body.len()
        );
        self.notify(request, Outcome::Success);
    }

    fn on_failure(&self, request: &Request, error: &RequestError) {
        println!("x  {} 失败: {}", url_of(request), error);
        self.notify(request, Outcome::Failure);
    }

    fn on_rescue(&self, request: &Request, recovered: &Bytes) {
        println!("~  {} 使用缓存响应，{}字节", url_of(request), recovered.len());
        self.notify(request, Outcome::Rescue);
    }

    fn on_network_error(&self, request: &Request) {
        println!("x  {} 网络不可用", url_of(request));
        self.notify(request, Outcome::NetworkError);
    }
}

fn url_of(request: &Request) -> String {
    request.url().map(|u| u.to_string()).unwrap_or_default()
}

fn main() {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统: {}", e);
    }

    // 2. 加载配置，失败时使用默认配置
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new()
        }
    };

    let targets: Vec<String> = env::args().skip(1).collect();
    if targets.is_empty() {
        println!("用法: httprequest <url|path>...");
        return;
    }

    // 3. 组装客户端
    let client = match ClientBuilder::from_config(&config)
        .and_then(|b| b.event_listener(Arc::new(LoggingEventListener::new())).build())
    {
        Ok(client) => client,
        Err(e) => {
            error!("无法创建客户端: {}", e);
            process::exit(1);
        }
    };

    // 4. 发送请求
    let (sender, receiver) = mpsc::channel();
    let listener = Arc::new(PrintingListener {
        events: Mutex::new(sender),
    });
    let host: Arc<dyn HostContext> = Arc::new(BackgroundHost);
    let mut calls = HashMap::new();
    for target in &targets {
        let builder = if UrlComposer::is_absolute(target) {
            RequestBuilder::new().url(target)
        } else {
            RequestBuilder::new().path(target)
        };
        let sent = builder
            .tag(target)
            .listener(listener.clone())
            .host(Arc::clone(&host))
            .build(false)
            .and_then(|request| client.send(request));
        match sent {
            Ok(call) => {
                info!("[ID{}]已提交: {}", call.id(), target);
                calls.insert(target.clone(), call);
            }
            Err(e) => error!("无法发送{}: {}", target, e),
        }
    }

    // 5. 等待所有调用结束；失败且命中缓存的调用还要等待救援回调
    let wait = Duration::from_secs(config.timeout_secs() + 5);
    while !calls.is_empty() {
        let (tag, outcome) = match receiver.recv_timeout(wait) {
            Ok(event) => event,
            Err(_) => {
                warn!("等待超时，取消剩余的{}个请求", calls.len());
                client.cancel_all();
                break;
            }
        };
        let done = match outcome {
            Outcome::Failure => calls
                .get(&tag)
                .map_or(true, |call| call.state() != CallState::Rescued),
            Outcome::Success | Outcome::Rescue | Outcome::NetworkError => true,
        };
        if done {
            calls.remove(&tag);
        }
    }
}
