// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求参数集合
//!
//! `ParamBag` 是有序的键值对集合，每个条目带有独立的"是否编码"标记，
//! 值既可以是标量（统一转换为字符串保存），也可以是文件句柄。
//! 重复的键按插入顺序全部保留，与表单语义一致。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::exception::Exception;
use crate::url_composer::encode_component;

#[derive(Debug, Clone, PartialEq)]
enum FileSource {
    Disk(PathBuf),
    Memory(Bytes),
}

/// multipart 表单中的文件分段来源。
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    name: String,
    source: FileSource,
}

impl FileHandle {
    /// 引用磁盘上的文件，文件名取路径的最后一段
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            source: FileSource::Disk(path),
        }
    }

    /// 直接使用内存中的字节作为文件内容
    pub fn from_bytes(name: &str, bytes: Bytes) -> Self {
        Self {
            name: name.to_string(),
            source: FileSource::Memory(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 文件后缀名（小写），用于推断 MIME 类型
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// 读取文件的全部内容
    pub fn read(&self) -> Result<Bytes, Exception> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Disk(path) => fs::read(path)
                .map(Bytes::from)
                .map_err(|e| Exception::FileUnreadable(format!("{}: {}", path.display(), e))),
        }
    }
}

impl fmt::Display for FileHandle {
    /// 磁盘文件显示为完整路径，内存文件显示为文件名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            FileSource::Disk(path) => write!(f, "{}", path.display()),
            FileSource::Memory(_) => write!(f, "{}", self.name),
        }
    }
}

/// 参数值：标量统一以字符串保存，文件以句柄保存
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    File(FileHandle),
}

impl ParamValue {
    pub fn is_file(&self) -> bool {
        matches!(self, ParamValue::File(_))
    }

    /// 值的字符串形式，文件值取其显示形式
    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Text(s) => s.clone(),
            ParamValue::File(f) => f.to_string(),
        }
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<FileHandle> for ParamValue {
    fn from(value: FileHandle) -> Self {
        ParamValue::File(value)
    }
}

macro_rules! scalar_param_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ParamValue {
                fn from(value: $t) -> Self {
                    ParamValue::Text(value.to_string())
                }
            }
        )*
    };
}

scalar_param_value!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

/// 单个参数条目
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub key: String,
    pub value: ParamValue,
    /// 为 `false` 时值已经过编码，按原样拼接
    pub encode: bool,
}

/// 有序参数集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBag {
    entries: Vec<ParamEntry>,
}

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个需要编码的参数
    pub fn add<V: Into<ParamValue>>(&mut self, key: &str, value: V) -> &mut Self {
        self.add_with(key, value, true)
    }

    /// 追加一个参数并指定是否编码
    pub fn add_with<V: Into<ParamValue>>(&mut self, key: &str, value: V, encode: bool) -> &mut Self {
        self.entries.push(ParamEntry {
            key: key.to_string(),
            value: value.into(),
            encode,
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_file(&self) -> bool {
        self.entries.iter().any(|e| e.value.is_file())
    }

    /// 参数指纹：按插入顺序以 `&` 连接 `key=value`，键和值都按表单规则转义，
    /// 与条目自身的编码标记无关。
    ///
    /// 写缓存与读缓存使用同一个指纹，跨进程稳定。
    pub fn fingerprint(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}={}", encode_component(&e.key), encode_component(&e.value.as_text())))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: AsRef<str>, V: Into<ParamValue>> FromIterator<(K, V)> for ParamBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = ParamBag::new();
        for (k, v) in iter {
            bag.add(k.as_ref(), v);
        }
        bag
    }
}
