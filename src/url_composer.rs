// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # URL 拼接
//!
//! 把 base URL 与相对路径合并为绝对 URL，并按请求方法追加查询参数：
//! 1. 路径本身已是绝对地址（`http://` 或 `https://` 开头）时忽略 base。
//! 2. base 与路径之间恰好保留一个 `/`。
//! 3. 无请求体的方法（GET、HEAD）把普通参数追加到查询串；单独添加的查询参数对任何方法都追加。
//! 4. 标记为需要编码的值做百分号编码，否则原样拼接。

use lazy_static::lazy_static;
use regex::Regex;
use url::{form_urlencoded, Url};

use crate::exception::Exception;
use crate::pairs::ParamBag;
use crate::param::HttpMethod;

lazy_static! {
    static ref ABSOLUTE_URL: Regex = Regex::new(r"(?i)^https?://").unwrap();
    static ref WEBSOCKET_URL: Regex = Regex::new(r"(?i)^ws(s?):").unwrap();
}

pub struct UrlComposer;

impl UrlComposer {
    pub fn is_absolute(url: &str) -> bool {
        ABSOLUTE_URL.is_match(url)
    }

    /// 把 `ws:` / `wss:` 静默替换为 `http:` / `https:`
    pub fn rewrite_websocket(url: &str) -> String {
        WEBSOCKET_URL.replace(url, "http$1:").into_owned()
    }

    /// 合并 base 与路径，二者之间恰好保留一个 `/`
    pub fn merge(base: &str, path: &str) -> String {
        let path = Self::rewrite_websocket(path);
        if Self::is_absolute(&path) || base.is_empty() {
            return path;
        }
        let base = Self::rewrite_websocket(base);
        if path.is_empty() {
            return base;
        }
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// 生成最终的请求 URL。
    ///
    /// # 参数
    /// * `target` - 已合并好的地址字符串（见 [`UrlComposer::merge`]）。
    /// * `method` - 决定普通参数是否进入查询串。
    /// * `params` - 普通参数，仅对无请求体的方法追加。
    /// * `queries` - 显式添加的查询参数，总是追加。
    ///
    /// # 错误处理
    /// 无法解析为绝对的 http/https URL 时返回 `Exception::InvalidUrl`。
    pub fn compose(
        target: &str,
        method: HttpMethod,
        params: &ParamBag,
        queries: &ParamBag,
    ) -> Result<Url, Exception> {
        let target = Self::rewrite_websocket(target);
        let mut url = match Url::parse(&target) {
            Ok(url) => url,
            Err(_) => return Err(Exception::InvalidUrl(target)),
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Exception::InvalidUrl(target));
        }
        if url.host_str().map_or(true, |h| h.is_empty()) {
            return Err(Exception::InvalidUrl(target));
        }

        let mut pairs = Vec::new();
        if !method.permits_body() {
            pairs.extend(Self::encode_pairs(params));
        }
        pairs.extend(Self::encode_pairs(queries));
        if pairs.is_empty() {
            return Ok(url);
        }

        let mut query = url.query().unwrap_or("").to_string();
        for pair in pairs {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&pair);
        }
        url.set_query(Some(&query));
        Ok(url)
    }

    fn encode_pairs(bag: &ParamBag) -> Vec<String> {
        bag.iter()
            .map(|entry| {
                let value = entry.value.as_text();
                if entry.encode {
                    format!("{}={}", encode_component(&entry.key), encode_component(&value))
                } else {
                    format!("{}={}", entry.key, value)
                }
            })
            .collect()
    }
}

/// application/x-www-form-urlencoded 规则下的百分号编码
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_inserts_single_slash() {
        assert_eq!(UrlComposer::merge("https://api.test", "v1/items"), "https://api.test/v1/items");
        assert_eq!(UrlComposer::merge("https://api.test/", "/v1/items"), "https://api.test/v1/items");
        assert_eq!(UrlComposer::merge("https://api.test/", "v1/items"), "https://api.test/v1/items");
        assert_eq!(UrlComposer::merge("https://api.test", "/v1/items"), "https://api.test/v1/items");
    }

    /// 路径为绝对地址时忽略 base
    #[test]
    fn test_merge_absolute_path_ignores_base() {
        assert_eq!(
            UrlComposer::merge("https://api.test", "http://other.test/x"),
            "http://other.test/x"
        );
        assert_eq!(UrlComposer::merge("", "v1"), "v1");
        assert_eq!(UrlComposer::merge("https://api.test/v1", ""), "https://api.test/v1");
    }

    #[test]
    fn test_websocket_rewrite() {
        assert_eq!(UrlComposer::rewrite_websocket("ws://h.test/a"), "http://h.test/a");
        assert_eq!(UrlComposer::rewrite_websocket("WSS://h.test/a"), "https://h.test/a");
        assert_eq!(UrlComposer::rewrite_websocket("https://h.test"), "https://h.test");
    }

    /// GET 请求把普通参数放入查询串
    #[test]
    fn test_get_appends_params() {
        let mut params = ParamBag::new();
        params.add("x", 1).add("name", "a b");
        let url = UrlComposer::compose(
            "https://api.test/v1/items",
            HttpMethod::Get,
            &params,
            &ParamBag::new(),
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://api.test/v1/items?x=1&name=a+b");
    }

    /// POST 请求只追加显式的查询参数
    #[test]
    fn test_post_appends_only_queries() {
        let mut params = ParamBag::new();
        params.add("body", "x");
        let mut queries = ParamBag::new();
        queries.add("page", 2);
        let url =
            UrlComposer::compose("https://api.test/list?sort=asc", HttpMethod::Post, &params, &queries)
                .unwrap();
        assert_eq!(url.as_str(), "https://api.test/list?sort=asc&page=2");
    }

    /// 关闭编码的值原样拼接
    #[test]
    fn test_raw_query_value_verbatim() {
        let mut queries = ParamBag::new();
        queries.add_with("q", "a%20b", false).add("r", "a%20b");
        let url = UrlComposer::compose("https://api.test/s", HttpMethod::Get, &ParamBag::new(), &queries)
            .unwrap();
        assert_eq!(url.query(), Some("q=a%20b&r=a%2520b"));
    }

    #[test]
    fn test_invalid_url() {
        let empty = ParamBag::new();
        for bad in ["v1/items", "ftp://files.test/a", "https://"] {
            match UrlComposer::compose(bad, HttpMethod::Get, &empty, &empty) {
                Err(Exception::InvalidUrl(_)) => {}
                other => panic!("Expected InvalidUrl for {}, got {:?}", bad, other),
            }
        }
    }
}
