// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! `Cache-Control` 指令集合。
//!
//! 只负责解析与序列化，指令本身交给传输层的 HTTP 缓存处理；
//! 本地响应缓存（救援缓存）不受这些指令影响。

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<u32>,
    pub max_stale: Option<u32>,
    pub min_fresh: Option<u32>,
    pub only_if_cached: bool,
    pub no_transform: bool,
    pub immutable: bool,
    pub must_revalidate: bool,
    pub public: bool,
    pub private: bool,
}

impl CacheControl {
    /// 强制走网络
    pub fn force_network() -> Self {
        Self {
            no_cache: true,
            ..Self::default()
        }
    }

    /// 只使用传输层缓存，允许任意陈旧
    pub fn force_cache() -> Self {
        Self {
            only_if_cached: true,
            max_stale: Some(u32::MAX),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 解析 `Cache-Control` 头的取值，无法识别的指令被忽略
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            let (name, arg) = match directive.split_once('=') {
                Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                None => (directive, None),
            };
            let seconds = arg.and_then(|a| a.parse::<u32>().ok());
            match name.to_lowercase().as_str() {
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "max-age" => cc.max_age = seconds,
                "max-stale" => cc.max_stale = Some(seconds.unwrap_or(u32::MAX)),
                "min-fresh" => cc.min_fresh = seconds,
                "only-if-cached" => cc.only_if_cached = true,
                "no-transform" => cc.no_transform = true,
                "immutable" => cc.immutable = true,
                "must-revalidate" => cc.must_revalidate = true,
                "public" => cc.public = true,
                "private" => cc.private = true,
                _ => {}
            }
        }
        cc
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.no_cache {
            parts.push("no-cache".to_string());
        }
        if self.no_store {
            parts.push("no-store".to_string());
        }
        if let Some(s) = self.max_age {
            parts.push(format!("max-age={}", s));
        }
        if self.private {
            parts.push("private".to_string());
        }
        if self.public {
            parts.push("public".to_string());
        }
        if self.must_revalidate {
            parts.push("must-revalidate".to_string());
        }
        if let Some(s) = self.max_stale {
            parts.push(format!("max-stale={}", s));
        }
        if let Some(s) = self.min_fresh {
            parts.push(format!("min-fresh={}", s));
        }
        if self.only_if_cached {
            parts.push("only-if-cached".to_string());
        }
        if self.no_transform {
            parts.push("no-transform".to_string());
        }
        if self.immutable {
            parts.push("immutable".to_string());
        }
        write!(f, "{}", parts.join(", "))
    }
}
