// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应
//!
//! 传输层完成一次往返后交给生命周期引擎的缓冲响应。响应体已完整读入内存并完成解压。

use bytes::Bytes;

use crate::headers::Headers;
use crate::param::{reason_phrase, STATUS_DOMAIN_OK};

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status_code: u16,
    information: String,
    headers: Headers,
    content: Bytes,
}

impl Response {
    pub fn new(status_code: u16, information: &str, headers: Headers, content: Bytes) -> Self {
        Self {
            status_code,
            information: information.to_string(),
            headers,
            content,
        }
    }

    /// 仅有状态码与响应体时使用标准原因短语
    pub fn from_status(status_code: u16, content: Bytes) -> Self {
        Self::new(status_code, reason_phrase(status_code), Headers::new(), content)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// 状态行中的原因短语，可能为空
    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn set_content(&mut self, content: Bytes) {
        self.content = content;
    }

    /// 状态码是否属于成功集合 {200, 230}
    ///
    /// 230 是业务约定的"成功"，与 200 同等对待。
    pub fn is_ok_status(&self) -> bool {
        self.status_code == 200 || self.status_code == STATUS_DOMAIN_OK
    }

    /// 成功的判定：状态码成功且响应体非空
    pub fn is_successful(&self) -> bool {
        self.is_ok_status() && !self.content.is_empty()
    }
}
