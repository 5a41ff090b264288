// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::fmt::Display;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// 按顺序用参数替换模板中的 `{}` 占位符。
///
/// 参数不足时保留剩余的占位符，多余的参数被忽略。
pub fn format_path(template: &str, args: &[&dyn Display]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// `Basic` 认证的头部取值
pub fn basic_credentials(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// 去掉主机名开头的 `www.`
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_path() {
        assert_eq!(format_path("users/{}/posts/{}", &[&42, &"draft"]), "users/42/posts/draft");
        assert_eq!(format_path("plain", &[&1]), "plain");
        assert_eq!(format_path("a/{}/{}", &[&"x"]), "a/x/{}");
    }

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials("Aladdin", "open sesame"), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_strip_www() {
        assert_eq!(strip_www("www.example.com"), "example.com");
        assert_eq!(strip_www("api.example.com"), "api.example.com");
    }
}
