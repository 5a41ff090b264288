// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 宿主上下文与回调分发
//!
//! 宿主（界面、后台服务或无宿主）决定监听器回调在哪个线程执行，以及回调是否还应执行：
//! - `Ui`：宿主存活时通过 `post_to_main` 投递到主线程；
//! - `Background`：每个调用独占一个新建的工作线程，按顺序执行该调用的全部回调；
//! - `Detached`：在当前线程（通常是传输层的工作线程）直接执行。
//!
//! 分发时与回调真正执行前都检查宿主是否存活，已销毁的宿主静默丢弃回调，但不会取消调用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

/// 投递到主线程或工作线程的任务
pub type HostTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// 有主线程的界面宿主
    Ui,
    /// 后台服务宿主
    Background,
    /// 无宿主
    Detached,
}

/// 宿主能力
pub trait HostContext: Send + Sync {
    fn kind(&self) -> HostKind;

    /// 界面宿主在 finishing/destroyed 之后返回 `false`
    fn is_alive(&self) -> bool {
        true
    }

    /// 把任务投递到主线程，默认在当前线程执行
    fn post_to_main(&self, task: HostTask) {
        task()
    }
}

/// 后台服务宿主，始终存活
#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundHost;

impl HostContext for BackgroundHost {
    fn kind(&self) -> HostKind {
        HostKind::Background
    }
}

/// 以消息队列模拟主线程的界面宿主。
///
/// 回调被投递到队列中，由拥有主循环的线程调用 [`MainLoopHost::run_pending`]
/// 或 [`MainLoopHost::run_for`] 执行；调用 [`MainLoopHost::finish`] 后宿主不再存活。
pub struct MainLoopHost {
    sender: Mutex<Sender<HostTask>>,
    receiver: Mutex<Receiver<HostTask>>,
    alive: AtomicBool,
}

impl MainLoopHost {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            alive: AtomicBool::new(true),
        }
    }

    pub fn finish(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// 执行队列中已有的全部任务，返回执行的数量
    pub fn run_pending(&self) -> usize {
        let receiver = match self.receiver.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut count = 0;
        while let Ok(task) = receiver.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// 在给定时长内持续执行到达的任务
    pub fn run_for(&self, duration: Duration) -> usize {
        let receiver = match self.receiver.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match receiver.recv_timeout(deadline - now) {
                Ok(task) => {
                    task();
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }
}

impl Default for MainLoopHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for MainLoopHost {
    fn kind(&self) -> HostKind {
        HostKind::Ui
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn post_to_main(&self, task: HostTask) {
        let sender = match self.sender.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if sender.send(task).is_err() {
            warn!("主循环已关闭，回调被丢弃");
        }
    }
}

/// 单个调用的回调分发器
pub(crate) struct Dispatcher {
    id: u64,
    host: Option<Arc<dyn HostContext>>,
    worker: Mutex<Option<Sender<HostTask>>>,
}

impl Dispatcher {
    pub(crate) fn new(id: u64, host: Option<Arc<dyn HostContext>>) -> Self {
        Self {
            id,
            host,
            worker: Mutex::new(None),
        }
    }

    /// 分发一个回调，`name` 仅用于日志
    pub(crate) fn dispatch(&self, name: &str, task: HostTask) {
        let host = match &self.host {
            Some(host) => host,
            None => return task(),
        };
        if !host.is_alive() {
            debug!("[ID{}]宿主已销毁，丢弃回调{}", self.id, name);
            return;
        }
        match host.kind() {
            HostKind::Ui => host.post_to_main(self.guarded(host, name, task)),
            HostKind::Background => self.run_on_worker(self.guarded(host, name, task)),
            HostKind::Detached => task(),
        }
    }

    /// 执行前再检查一次宿主，排队期间宿主可能已经销毁
    fn guarded(&self, host: &Arc<dyn HostContext>, name: &str, task: HostTask) -> HostTask {
        let guard = Arc::clone(host);
        let id = self.id;
        let name = name.to_string();
        Box::new(move || {
            if guard.is_alive() {
                task()
            } else {
                debug!("[ID{}]宿主在回调执行前已销毁，丢弃回调{}", id, name);
            }
        })
    }

    /// 终态之后关闭工作线程的队列，线程执行完剩余任务后退出
    pub(crate) fn close(&self) {
        let mut worker = match self.worker.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        worker.take();
    }

    fn run_on_worker(&self, task: HostTask) {
        let mut worker = match self.worker.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let task = match worker.as_ref() {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                // 工作线程因监听器 panic 退出，换一个新的
                Err(mpsc::SendError(task)) => task,
            },
            None => task,
        };
        let (sender, receiver) = mpsc::channel::<HostTask>();
        let spawned = thread::Builder::new()
            .name(format!("httprequest-call-{}", self.id))
            .spawn(move || {
                for task in receiver {
                    task();
                }
            });
        match spawned {
            Ok(_) => {
                if let Err(mpsc::SendError(task)) = sender.send(task) {
                    error!("[ID{}]无法投递回调到工作线程，改为就地执行", self.id);
                    task();
                    return;
                }
                *worker = Some(sender);
            }
            Err(e) => {
                error!("[ID{}]无法创建工作线程: {}，改为就地执行", self.id, e);
                task();
            }
        }
    }
}
