// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 本地响应缓存
//!
//! 以 `(url, method, 参数指纹)` 为主键保存最近一次成功响应的响应体，只在失败路径上被读取，
//! 用于"救援"失败的请求。
//!
//! - 默认不限条数：一次成功写入的记录会一直保留，直到被同一主键的新成功覆盖或被 `flush_all` 清空。
//!   需要限制磁盘占用时可以显式指定上限，满了以后淘汰最久未读写的记录。
//! - 缓存文件是追加写的日志，每行一个 JSON 操作（写入或清空），打开时按顺序重放；
//!   日志中过期的行超过一定比例时整体压缩（先写临时文件再原子重命名）。
//! - 写者之间通过日志锁串行，磁盘写成功后才更新内存表；读者只碰内存表，不等待磁盘 I/O。

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use lru::LruCache;
use serde_derive::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::exception::Exception;

/// 日志行数超过存活记录数的这个倍数时压缩
const COMPACT_RATIO: usize = 2;
/// 小于这个行数的日志不压缩
const COMPACT_MIN_LINES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub url: String,
    pub method: String,
    pub param: String,
}

impl CacheKey {
    pub fn new(url: &str, method: &str, param: &str) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            param: param.to_string(),
        }
    }
}

/// 缓存表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: u64,
    pub url: String,
    pub method: String,
    pub param: String,
    #[serde(with = "base64_bytes")]
    pub response: Bytes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRecord {
    fn key(&self) -> CacheKey {
        CacheKey::new(&self.url, &self.method, &self.param)
    }
}

/// 日志中的一行
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogEntry {
    Put { record: CacheRecord },
    Clear,
}

struct Table {
    records: LruCache<CacheKey, CacheRecord>,
    next_id: u64,
}

impl Table {
    fn new(capacity: Option<NonZeroUsize>) -> Self {
        let records = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { records, next_id: 1 }
    }

    fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Put { record } => {
                self.next_id = self.next_id.max(record.id + 1);
                let key = record.key();
                self.records.pop(&key);
                if let Some((evicted, _)) = self.records.push(key, record) {
                    debug!("缓存已满，淘汰记录：{} {}", evicted.method, evicted.url);
                }
            }
            LogEntry::Clear => self.records.clear(),
        }
    }
}

struct LogFile {
    path: PathBuf,
    file: File,
    lines: usize,
}

pub struct ResponseCache {
    table: Mutex<Table>,
    /// 写者锁；持久化缓存同时持有日志文件
    log: Mutex<Option<LogFile>>,
    path: Option<PathBuf>,
}

impl ResponseCache {
    /// 打开（或新建）位于 `path` 的缓存文件，不限条数。
    ///
    /// 无法解析的行（例如进程在写入中途退出留下的半行）记录警告后跳过。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Exception> {
        Self::open_with_capacity(path, None)
    }

    /// 打开缓存文件并限制最多保存 `max_records` 条记录
    pub fn open_bounded<P: AsRef<Path>>(path: P, max_records: usize) -> Result<Self, Exception> {
        Self::open_with_capacity(path, Some(capacity_or_min(max_records)))
    }

    fn open_with_capacity<P: AsRef<Path>>(path: P, capacity: Option<NonZeroUsize>) -> Result<Self, Exception> {
        let path = path.as_ref().to_path_buf();
        let mut table = Table::new(capacity);
        let mut lines = 0;
        let mut torn_tail = false;
        if path.exists() {
            let raw = fs::read(&path).map_err(|e| io_error(&path, e))?;
            torn_tail = !raw.is_empty() && !raw.ends_with(b"\n");
            for (n, line) in raw.split(|b| *b == b'\n').enumerate() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                lines += 1;
                match serde_json::from_slice::<LogEntry>(line) {
                    Ok(entry) => table.apply(entry),
                    Err(e) => warn!("缓存文件{}第{}行已损坏，跳过：{}", path.display(), n + 1, e),
                }
            }
            debug!("从{}载入{}条缓存记录", path.display(), table.records.len());
        }
        let mut file = append_handle(&path)?;
        if torn_tail {
            // 半行之后另起一行，避免与下一条记录粘连
            file.write_all(b"\n").map_err(|e| io_error(&path, e))?;
        }
        let cache = Self {
            table: Mutex::new(table),
            log: Mutex::new(Some(LogFile {
                path: path.clone(),
                file,
                lines,
            })),
            path: Some(path),
        };
        {
            let mut log = cache.lock_log();
            if let Some(log) = log.as_mut() {
                cache.compact_if_needed(log)?;
            }
        }
        Ok(cache)
    }

    /// 不落盘、不限条数的缓存，进程退出即丢失
    pub fn in_memory() -> Self {
        Self::memory_with_capacity(None)
    }

    /// 不落盘、最多保存 `max_records` 条记录的缓存
    pub fn bounded_in_memory(max_records: usize) -> Self {
        Self::memory_with_capacity(Some(capacity_or_min(max_records)))
    }

    fn memory_with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            table: Mutex::new(Table::new(capacity)),
            log: Mutex::new(None),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 查询缓存的响应体，未命中返回 `None`
    pub fn load(&self, url: &str, method: &str, param: &str) -> Option<Bytes> {
        let mut table = self.lock_table();
        table
            .records
            .get(&CacheKey::new(url, method, param))
            .map(|r| r.response.clone())
    }

    /// 查询完整记录，不影响淘汰顺序
    pub fn record(&self, url: &str, method: &str, param: &str) -> Option<CacheRecord> {
        let table = self.lock_table();
        table.records.peek(&CacheKey::new(url, method, param)).cloned()
    }

    /// 写入（upsert）：主键存在时更新响应体与 `updated_at` 并保留 `created_at`，否则插入。
    ///
    /// 持久化失败时返回错误，内存表保持写入前的状态。
    pub fn save(&self, url: &str, method: &str, param: &str, response: Bytes) -> Result<(), Exception> {
        let mut log = self.lock_log();
        let key = CacheKey::new(url, method, param);
        let now = Utc::now();
        let record = {
            let mut table = self.lock_table();
            let existing = table.records.peek(&key).cloned();
            match existing {
                Some(existing) => CacheRecord {
                    response,
                    updated_at: now,
                    ..existing
                },
                None => {
                    let id = table.next_id;
                    table.next_id += 1;
                    CacheRecord {
                        id,
                        url: key.url.clone(),
                        method: key.method.clone(),
                        param: key.param.clone(),
                        response,
                        created_at: now,
                        updated_at: now,
                    }
                }
            }
        };
        let entry = LogEntry::Put { record };
        if let Some(log) = log.as_mut() {
            append(log, &entry)?;
        }
        self.lock_table().apply(entry);
        if let Some(log) = log.as_mut() {
            if let Err(e) = self.compact_if_needed(log) {
                warn!("压缩缓存文件失败，保留原日志: {}", e);
            }
        }
        Ok(())
    }

    /// 删除所有记录
    pub fn flush_all(&self) -> Result<(), Exception> {
        let mut log = self.lock_log();
        if let Some(log) = log.as_mut() {
            rewrite(log, &[])?;
        }
        self.lock_table().apply(LogEntry::Clear);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock_table().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 条数上限，不限条数时为 `None`
    pub fn capacity(&self) -> Option<usize> {
        let table = self.lock_table();
        if table.records.cap().get() == usize::MAX {
            None
        } else {
            Some(table.records.cap().get())
        }
    }

    /// 日志中的过期行过多时按当前内存表重写
    fn compact_if_needed(&self, log: &mut LogFile) -> Result<(), Exception> {
        let live = self.len();
        if log.lines < COMPACT_MIN_LINES || log.lines <= live * COMPACT_RATIO {
            return Ok(());
        }
        let records: Vec<CacheRecord> = {
            let table = self.lock_table();
            // LruCache 的迭代顺序是从新到旧
            table.records.iter().rev().map(|(_, r)| r.clone()).collect()
        };
        debug!("压缩缓存文件{}：{}行 → {}行", log.path.display(), log.lines, records.len());
        rewrite(log, &records)
    }

    fn lock_table(&self) -> MutexGuard<'_, Table> {
        match self.table.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn lock_log(&self) -> MutexGuard<'_, Option<LogFile>> {
        match self.log.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("缓存日志锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }
}

fn append(log: &mut LogFile, entry: &LogEntry) -> Result<(), Exception> {
    let mut line = serde_json::to_vec(entry).map_err(|e| Exception::CacheIo(e.to_string()))?;
    line.push(b'\n');
    log.file.write_all(&line).map_err(|e| {
        error!("写入缓存文件{}失败: {}", log.path.display(), e);
        io_error(&log.path, e)
    })?;
    log.lines += 1;
    Ok(())
}

/// 以给定记录原子地替换整个日志文件
fn rewrite(log: &mut LogFile, records: &[CacheRecord]) -> Result<(), Exception> {
    let dir = match log.path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut content = Vec::new();
    for record in records {
        let entry = LogEntry::Put {
            record: record.clone(),
        };
        content.extend(serde_json::to_vec(&entry).map_err(|e| Exception::CacheIo(e.to_string()))?);
        content.push(b'\n');
    }
    let mut file = NamedTempFile::new_in(&dir).map_err(|e| io_error(&log.path, e))?;
    file.write_all(&content).map_err(|e| io_error(&log.path, e))?;
    file.persist(&log.path).map_err(|e| io_error(&log.path, e.error))?;
    log.file = append_handle(&log.path)?;
    log.lines = records.len();
    Ok(())
}

fn append_handle(path: &Path) -> Result<File, Exception> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| io_error(path, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: std::io::Error) -> Exception {
    Exception::CacheIo(format!("{}: {}", path.display(), e))
}

fn capacity_or_min(max_records: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_records).unwrap_or(NonZeroUsize::MIN)
}

/// 响应体在缓存文件中以 base64 字符串保存
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
