// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求视图模块
//!
//! 网关以 [`Environ`] 的形式把一次调用交给分发引擎：它是一组 CGI 风格的环境变量
//! （`REQUEST_METHOD`、`PATH_INFO`、`QUERY_STRING`、`HTTP_*` 等）加上一个可读的请求体流。
//!
//! [`Request`] 是对 `Environ` 的只读投影：
//! 1. 路径在构造时完成百分号解码。
//! 2. 请求头、Cookie、请求体和表单字段都是惰性解析的，第一次访问时解析并缓存，
//!    在请求的整个生命周期内只解析一次。
//! 3. 表单字段合并了查询字符串与 `application/x-www-form-urlencoded` 请求体。

use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    fmt,
    io::{self, Read},
};

use bytes::Bytes;
use log::debug;

use crate::{exception::Exception, param::HttpRequestMethod};

/// 网关传入的调用环境
pub struct Environ {
    vars: HashMap<String, String>,
    input: Box<dyn Read + Send>,
}

impl Environ {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            input: Box::new(io::empty()),
        }
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_input(mut self, input: impl Read + Send + 'static) -> Self {
        self.input = Box::new(input);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }
}

impl Default for Environ {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ").field("vars", &self.vars).finish()
    }
}

/// 一次请求的只读视图
pub struct Request {
    vars: HashMap<String, String>,
    path: String,
    input: RefCell<Option<Box<dyn Read + Send>>>,
    headers: OnceCell<HashMap<String, String>>,
    cookies: OnceCell<HashMap<String, String>>,
    body: OnceCell<Result<Bytes, Exception>>,
    form: OnceCell<HashMap<String, Vec<String>>>,
}

impl Request {
    pub fn from_environ(environ: Environ) -> Self {
        let Environ { vars, input } = environ;
        let raw_path = vars.get("PATH_INFO").map(|p| p.as_str()).unwrap_or("");
        let path = unquote(raw_path);
        Self {
            vars,
            path,
            input: RefCell::new(Some(input)),
            headers: OnceCell::new(),
            cookies: OnceCell::new(),
            body: OnceCell::new(),
            form: OnceCell::new(),
        }
    }

    /// 原始的请求方法名，例如 `GET`
    pub fn method(&self) -> &str {
        self.vars.get("REQUEST_METHOD").map(|m| m.as_str()).unwrap_or("")
    }

    /// 框架支持的请求方法，其余方法返回 `None`
    pub fn request_method(&self) -> Option<HttpRequestMethod> {
        HttpRequestMethod::parse(self.method())
    }

    /// 解码后的请求路径
    pub fn path_info(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        self.environ_var("QUERY_STRING").unwrap_or("")
    }

    pub fn host(&self) -> &str {
        self.environ_var("HTTP_HOST").unwrap_or("")
    }

    /// 客户端地址，取不到时返回 `0.0.0.0`
    pub fn remote_addr(&self) -> &str {
        self.environ_var("REMOTE_ADDR").unwrap_or("0.0.0.0")
    }

    pub fn document_root(&self) -> &str {
        self.environ_var("DOCUMENT_ROOT").unwrap_or("")
    }

    pub fn environ_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn environ(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// 全部请求头，名称为大写、以 `-` 连接，例如 `USER-AGENT`
    pub fn headers(&self) -> &HashMap<String, String> {
        self.headers.get_or_init(|| {
            self.vars
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix("HTTP_")
                        .map(|name| (name.replace('_', "-").to_uppercase(), v.clone()))
                })
                .collect()
        })
    }

    /// 按名称查询请求头，大小写不敏感
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(&name.to_uppercase()).map(|v| v.as_str())
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        self.cookies.get_or_init(|| {
            let mut cookies = HashMap::new();
            if let Some(raw) = self.environ_var("HTTP_COOKIE") {
                for pair in raw.split(';') {
                    if let Some((name, value)) = pair.split_once('=') {
                        let name = name.trim();
                        if !name.is_empty() {
                            cookies.insert(name.to_string(), unquote(value.trim()));
                        }
                    }
                }
            }
            cookies
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(|v| v.as_str())
    }

    /// 原始请求体。最多读取 `CONTENT_LENGTH` 字节，读取结果（包括失败）只产生一次并缓存。
    pub fn body(&self) -> Result<Bytes, Exception> {
        self.body.get_or_init(|| self.read_body()).clone()
    }

    fn read_body(&self) -> Result<Bytes, Exception> {
        let mut buf = Vec::new();
        if let Some(input) = self.input.borrow_mut().take() {
            match self.content_length() {
                Some(len) => {
                    input.take(len).read_to_end(&mut buf)?;
                }
                None => {
                    let mut input = input;
                    input.read_to_end(&mut buf)?;
                }
            }
        }
        debug!("读取请求体 {} bytes", buf.len());
        Ok(Bytes::from(buf))
    }

    fn content_length(&self) -> Option<u64> {
        self.environ_var("CONTENT_LENGTH")
            .and_then(|len| len.trim().parse().ok())
    }

    fn form(&self) -> Result<&HashMap<String, Vec<String>>, Exception> {
        if let Some(form) = self.form.get() {
            return Ok(form);
        }
        let mut fields = HashMap::new();
        parse_urlencoded(self.query_string(), &mut fields);

        let is_form_post = self.request_method() == Some(HttpRequestMethod::Post)
            && self
                .environ_var("CONTENT_TYPE")
                .map_or(false, |t| t.starts_with("application/x-www-form-urlencoded"));
        if is_form_post {
            let body = self.body()?;
            parse_urlencoded(&String::from_utf8_lossy(&body), &mut fields);
        }
        Ok(self.form.get_or_init(|| fields))
    }

    /// 表单字段的第一个值
    pub fn get(&self, key: &str) -> Result<Option<String>, Exception> {
        Ok(self.form()?.get(key).and_then(|v| v.first()).cloned())
    }

    /// 表单字段的全部值，字段不存在时返回空列表
    pub fn gets(&self, key: &str) -> Result<Vec<String>, Exception> {
        Ok(self.form()?.get(key).cloned().unwrap_or_default())
    }

    /// 以 `defaults` 为底，叠加全部表单字段（多值字段取第一个值）
    pub fn input(&self, defaults: &[(&str, &str)]) -> Result<HashMap<String, String>, Exception> {
        let mut merged: HashMap<String, String> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (key, values) in self.form()? {
            if let Some(first) = values.first() {
                merged.insert(key.clone(), first.clone());
            }
        }
        Ok(merged)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method())
            .field("path", &self.path)
            .finish()
    }
}

/// 百分号解码，非法编码时保留原文
pub fn unquote(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned(),
    }
}

fn parse_urlencoded(raw: &str, fields: &mut HashMap<String, Vec<String>>) {
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = unquote(&key.replace('+', " "));
        let value = unquote(&value.replace('+', " "));
        fields.entry(key).or_default().push(value);
    }
}
