// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Cookie 与 Cookie 存储
//!
//! 传输层在发送前从 [`CookieJar`] 读取匹配 URL 的 Cookie，收到响应后把 `Set-Cookie`
//! 解析为 [`Cookie`] 存回。默认的 [`MemoryCookieJar`] 只保存在内存中。

use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use serde_derive::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// 不带前导点的域名
    pub domain: String,
    pub path: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    /// 没有 `Domain` 属性时只匹配设置它的主机
    pub host_only: bool,
}

impl Cookie {
    /// 解析一条 `Set-Cookie` 头。
    ///
    /// 名称为空、`Domain` 与请求主机不匹配时返回 `None`。
    pub fn parse(url: &Url, set_cookie: &str) -> Option<Cookie> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut parts = set_cookie.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            domain: host.clone(),
            path: default_path(url),
            expires_at: None,
            secure: false,
            http_only: false,
            host_only: true,
        };
        let mut max_age = None;

        for attr in parts {
            let attr = attr.trim();
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = val.trim_start_matches('.').to_ascii_lowercase();
                    if domain.is_empty() {
                        continue;
                    }
                    if !domain_match(&host, &domain) {
                        debug!("拒绝与主机{}不匹配的Cookie域{}", host, domain);
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => match parse_cookie_date(val) {
                    Some(t) => cookie.expires_at = Some(t),
                    None => debug!("无法解析Cookie过期时间，按会话Cookie处理: {}", val),
                },
                "max-age" => {
                    if let Some(t) = max_age_expiry(val, Utc::now()) {
                        max_age = Some(t);
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
        // Max-Age 优先于 Expires
        if max_age.is_some() {
            cookie.expires_at = max_age;
        }
        Some(cookie)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |t| t <= now)
    }

    /// 是否应随发往 `url` 的请求一起发送
    pub fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        };
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok && path_match(url.path(), &self.path) && (!self.secure || url.scheme() == "https")
    }

    /// `name=value`
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// `Max-Age` 换算成过期时刻。非零的正数按秒累加，超出可表示范围时取最晚时刻；
/// 零或负数表示立即过期；格式不合法时忽略该属性。
fn max_age_expiry(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if value.starts_with('-') {
        return Some(DateTime::<Utc>::MIN_UTC);
    }
    let secs = match digits.parse::<i64>() {
        Ok(0) => return Some(DateTime::<Utc>::MIN_UTC),
        Ok(secs) => secs,
        Err(_) => i64::MAX,
    };
    let expiry = Duration::try_seconds(secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Some(expiry)
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// 按 RFC 6265 第 5.1.1 节的宽松语法解析 Cookie 日期。
///
/// 先按分隔符切出记号，再依次识别时间、日、月、年，能接受
/// `Wed, 21 Oct 2015 07:28:00 GMT`、`Wednesday, 21-Oct-15 07:28:00 GMT`、
/// `Wed Oct 21 07:28:00 2015` 等常见写法。
pub fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    let mut time = None;
    let mut day = None;
    let mut month = None;
    let mut year = None;

    for token in value.split(is_date_delimiter).filter(|t| !t.is_empty()) {
        if time.is_none() {
            if let Some(hms) = parse_time_token(token) {
                time = Some(hms);
                continue;
            }
        }
        if day.is_none() {
            if let Some(d) = leading_number(token, 1, 2) {
                day = Some(d);
                continue;
            }
        }
        if month.is_none() {
            let prefix = token.get(..3).map(str::to_ascii_lowercase);
            if let Some(m) = prefix.and_then(|p| MONTHS.iter().position(|name| *name == p)) {
                month = Some(m as u32 + 1);
                continue;
            }
        }
        if year.is_none() {
            if let Some(y) = leading_number(token, 2, 4) {
                year = Some(y);
            }
        }
    }

    let (hour, minute, second) = time?;
    let mut year = year?;
    if (70..=99).contains(&year) {
        year += 1900;
    } else if year <= 69 {
        year += 2000;
    }
    if year < 1601 || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month?, day?)?
        .and_hms_opt(hour, minute, second)
        .map(|t| t.and_utc())
}

fn is_date_delimiter(c: char) -> bool {
    matches!(c, '\t' | ' '..='/' | ';'..='@' | '['..='`' | '{'..='~')
}

/// 记号开头的数字串，位数须在 `[min, max]` 之内，其后只能跟非数字字符
fn leading_number(token: &str, min: usize, max: usize) -> Option<u32> {
    let len = token.bytes().take_while(u8::is_ascii_digit).count();
    if len < min || len > max {
        return None;
    }
    token[..len].parse().ok()
}

/// `h:m:s`，每段一到两位数字
fn parse_time_token(token: &str) -> Option<(u32, u32, u32)> {
    let mut fields = token.splitn(3, ':');
    let hour = fields.next()?;
    let minute = fields.next()?;
    let second = fields.next()?;
    if hour.len() > 2 || minute.len() > 2 || !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((hour.parse().ok()?, minute.parse().ok()?, leading_number(second, 1, 2)?))
}

fn domain_match(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Cookie 存储能力
pub trait CookieJar: Send + Sync {
    /// 读取发往 `url` 时应携带的 Cookie
    fn load_for_url(&self, url: &Url) -> Vec<Cookie>;
    /// 保存来自 `url` 的响应中的 Cookie
    fn save_from_url(&self, url: &Url, cookies: Vec<Cookie>);
    fn clear(&self);
}

/// 内存中的 Cookie 存储
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RwLock<Vec<Cookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.cookies.read() {
            Ok(c) => c.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieJar for MemoryCookieJar {
    fn load_for_url(&self, url: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        let cookies = match self.cookies.read() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        cookies
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(url))
            .cloned()
            .collect()
    }

    fn save_from_url(&self, _url: &Url, cookies: Vec<Cookie>) {
        let now = Utc::now();
        let mut stored = match self.cookies.write() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cookie in cookies {
            stored.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
            if !cookie.is_expired(now) {
                stored.push(cookie);
            }
        }
        stored.retain(|c| !c.is_expired(now));
    }

    fn clear(&self) {
        match self.cookies.write() {
            Ok(mut c) => c.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
