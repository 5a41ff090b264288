// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求体编码
//!
//! 根据参数集合选择编码方式：
//! - 任意参数为文件 → `multipart/form-data`，每个请求生成唯一的 boundary；
//! - 否则 → `application/x-www-form-urlencoded`，保持顺序并遵守每个条目的编码标记。
//!
//! 禁止携带请求体的方法（GET、HEAD）无论参数如何都不产生请求体。

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::exception::Exception;
use crate::pairs::{FileHandle, ParamBag, ParamValue};
use crate::param::{HttpMethod, CRLF, MIME_FALLBACK, MIME_TYPES};
use crate::url_composer::encode_component;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM: &str = "multipart/form-data";

/// 已编码完成的请求体，长度与类型在构建后即固定
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    content_type: String,
    content: Bytes,
}

impl RequestBody {
    pub fn new(content_type: &str, content: Bytes) -> Self {
        Self {
            content_type: content_type.to_string(),
            content,
        }
    }

    pub fn text(content: &str) -> Self {
        Self::new("text/plain; charset=utf-8", Bytes::from(content.to_string()))
    }

    pub fn json(content: &serde_json::Value) -> Self {
        Self::new("application/json; charset=utf-8", Bytes::from(content.to_string()))
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// 精确的字节长度
    pub fn content_length(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn bytes(&self) -> &Bytes {
        &self.content
    }
}

/// 文件 MIME 类型推断能力
pub trait MimeResolver: Send + Sync {
    fn mime_for(&self, file: &FileHandle) -> String;
}

/// 依据文件后缀名查表的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionMimeResolver;

impl MimeResolver for ExtensionMimeResolver {
    fn mime_for(&self, file: &FileHandle) -> String {
        file.extension()
            .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
            .unwrap_or(MIME_FALLBACK)
            .to_string()
    }
}

pub struct BodyComposer<'a> {
    resolver: &'a dyn MimeResolver,
}

impl<'a> BodyComposer<'a> {
    pub fn new(resolver: &'a dyn MimeResolver) -> Self {
        Self { resolver }
    }

    /// 生成请求体。
    ///
    /// # 逻辑步骤
    /// 1. 方法禁止请求体：显式设置过请求体则报错，否则返回 `None`。
    /// 2. 显式设置了请求体且没有参数：原样使用。
    /// 3. 没有参数且方法不要求请求体（DELETE、OPTIONS 等）：返回 `None`。
    /// 4. 参数中含文件：multipart；否则：表单编码（参数为空时得到空表单）。
    pub fn compose(
        &self,
        method: HttpMethod,
        params: &ParamBag,
        explicit: Option<&RequestBody>,
    ) -> Result<Option<RequestBody>, Exception> {
        if !method.permits_body() {
            if explicit.is_some() {
                return Err(Exception::BodyNotAllowed(method));
            }
            return Ok(None);
        }
        if let Some(body) = explicit {
            if params.is_empty() {
                return Ok(Some(body.clone()));
            }
        }
        if params.is_empty() && !method.requires_body() {
            return Ok(None);
        }
        if params.contains_file() {
            self.multipart(params, &new_boundary()).map(Some)
        } else {
            Ok(Some(form(params)))
        }
    }

    /// 使用给定的 boundary 生成 multipart 请求体
    pub fn multipart(&self, params: &ParamBag, boundary: &str) -> Result<RequestBody, Exception> {
        let mut buf = BytesMut::new();
        for entry in params.iter() {
            buf.put_slice(format!("--{}{}", boundary, CRLF).as_bytes());
            match &entry.value {
                ParamValue::File(file) => {
                    let content = file.read()?;
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"{}",
                            escape_quoted(&entry.key),
                            escape_quoted(file.name()),
                            CRLF
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(
                        format!("Content-Type: {}{}", self.resolver.mime_for(file), CRLF).as_bytes(),
                    );
                    buf.put_slice(format!("Content-Length: {}{}{}", content.len(), CRLF, CRLF).as_bytes());
                    buf.put_slice(&content);
                }
                ParamValue::Text(text) => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"{}{}",
                            escape_quoted(&entry.key),
                            CRLF,
                            CRLF
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(text.as_bytes());
                }
            }
            buf.put_slice(CRLF.as_bytes());
        }
        buf.put_slice(format!("--{}--{}", boundary, CRLF).as_bytes());
        Ok(RequestBody::new(
            &format!("{}; boundary={}", MULTIPART_FORM, boundary),
            buf.freeze(),
        ))
    }
}

/// 表单编码，保持顺序并遵守编码标记
pub fn form(params: &ParamBag) -> RequestBody {
    let encoded = params
        .iter()
        .map(|entry| {
            let value = entry.value.as_text();
            if entry.encode {
                format!("{}={}", encode_component(&entry.key), encode_component(&value))
            } else {
                format!("{}={}", entry.key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    RequestBody::new(FORM_URLENCODED, Bytes::from(encoded))
}

fn new_boundary() -> String {
    Uuid::new_v4().simple().to_string()
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\n', "%0A")
        .replace('\r', "%0D")
        .replace('"', "%22")
}
