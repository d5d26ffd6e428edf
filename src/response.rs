// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 响应构建模块
//!
//! [`Response`] 在请求处理过程中累积状态行、响应头和 Cookie，最终由分发引擎一次性输出。
//!
//! ## 状态码
//! `set_status` 接受整数或字符串：
//! - 整数必须在 `[100, 999]` 内，输出为 `"NNN 原因短语"`，短语未知时只输出数字；
//! - 字符串必须形如 `404` 或 `404 Not Found`，原样保存；
//! - 其余类型（例如浮点数）是类型错误。
//!
//! ## 响应头
//! 约 37 个已知响应头的名称大小写不敏感，统一规范化为标准写法；未知名称按调用方给出的写法原样保存。
//!
//! ## 响应体
//! [`Body`] 是按块产出字节的迭代器。内存中的内容只有一块，文件内容由 [`FileChunks`] 按块惰性读取。

use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use chrono::prelude::*;
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;

use crate::{
    exception::Exception,
    param::{BLOCK_SIZE, DEFAULT_CONTENT_TYPE, POWERED_BY, RESPONSE_HEADER_DICT, STATUS_CODES},
};

lazy_static! {
    static ref RE_STATUS: Regex = Regex::new(r"^\d\d\d( [\w ]+)?$").unwrap();
}

/// Cookie `Expires` 的日期格式
const COOKIE_DATE_FORMAT: &str = "%a, %d-%b-%Y %H:%M:%S GMT";

/// 可以赋给状态码的值
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Code(i64),
    Text(String),
    /// 不被接受的类型，保存其描述用于报错
    Other(String),
}

impl From<u16> for StatusValue {
    fn from(code: u16) -> Self {
        StatusValue::Code(code as i64)
    }
}

impl From<u32> for StatusValue {
    fn from(code: u32) -> Self {
        StatusValue::Code(code as i64)
    }
}

impl From<i32> for StatusValue {
    fn from(code: i32) -> Self {
        StatusValue::Code(code as i64)
    }
}

impl From<i64> for StatusValue {
    fn from(code: i64) -> Self {
        StatusValue::Code(code)
    }
}

impl From<&str> for StatusValue {
    fn from(s: &str) -> Self {
        StatusValue::Text(s.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(s: String) -> Self {
        StatusValue::Text(s)
    }
}

impl From<f64> for StatusValue {
    fn from(v: f64) -> Self {
        StatusValue::Other(format!("float {}", v))
    }
}

impl From<f32> for StatusValue {
    fn from(v: f32) -> Self {
        StatusValue::Other(format!("float {}", v))
    }
}

/// Cookie 的过期时间
#[derive(Debug, Clone, PartialEq)]
pub enum Expires {
    /// Unix 时间戳（秒）
    Timestamp(f64),
    At(DateTime<Utc>),
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Expires {
    fn from(t: DateTime<Tz>) -> Self {
        Expires::At(t.with_timezone(&Utc))
    }
}

impl Expires {
    fn format(&self) -> String {
        let at = match self {
            Expires::At(t) => *t,
            Expires::Timestamp(ts) => {
                let secs = ts.floor() as i64;
                DateTime::from_timestamp(secs, 0).unwrap_or_default()
            }
        };
        at.format(COOKIE_DATE_FORMAT).to_string()
    }
}

/// `set_cookie` 的可选参数，默认 `Path=/`、`HttpOnly`
#[derive(Debug, Clone)]
pub struct CookieOptions {
    max_age: Option<i64>,
    expires: Option<Expires>,
    path: String,
    domain: Option<String>,
    secure: bool,
    http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            max_age: None,
            expires: None,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// 同时设置了 `max_age` 时以 `expires` 为准
    pub fn expires(mut self, expires: impl Into<Expires>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// 设置了域名的 Cookie 总会带上 `Secure`
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    fn serialize(&self, name: &str, value: &str) -> String {
        let mut parts = vec![format!(
            "{}={}",
            urlencoding::encode(name),
            urlencoding::encode(value)
        )];
        if let Some(expires) = &self.expires {
            parts.push(format!("Expires={}", expires.format()));
        } else if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age));
        }
        parts.push(format!("Path={}", self.path));
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={}", domain));
        }
        if self.secure || self.domain.is_some() {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        parts.join("; ")
    }
}

/// 已知响应头返回标准写法，未知的原样返回
fn canonical_header(name: &str) -> String {
    match RESPONSE_HEADER_DICT.get(&name.to_uppercase()) {
        Some(canonical) => canonical.to_string(),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status: String,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
}

impl Response {
    pub fn new() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
        Self {
            status: "200 OK".to_string(),
            headers,
            cookies: BTreeMap::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&canonical_header(name)).map(|v| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl ToString) {
        self.headers.insert(canonical_header(name), value.to_string());
    }

    /// 删除响应头，头不存在时什么也不做
    pub fn unset_header(&mut self, name: &str) {
        self.headers.remove(&canonical_header(name));
    }

    /// 最终输出的全部响应头：普通头、每个 Cookie 一条 `Set-Cookie`、`X-Powered-By`
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for cookie in self.cookies.values() {
            list.push(("Set-Cookie".to_string(), cookie.clone()));
        }
        list.push((POWERED_BY.0.to_string(), POWERED_BY.1.to_string()));
        list
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// 传入 `None` 删除 `Content-Type`
    pub fn set_content_type(&mut self, content_type: Option<&str>) {
        match content_type {
            Some(t) => self.set_header("Content-Type", t),
            None => self.unset_header("Content-Type"),
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.set_header("Content-Length", length);
    }

    /// 完整状态行，例如 `200 OK`
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status
            .get(..3)
            .and_then(|code| code.parse().ok())
            .unwrap_or(500)
    }

    pub fn set_status(&mut self, value: impl Into<StatusValue>) -> Result<(), Exception> {
        match value.into() {
            StatusValue::Code(code) => {
                if !(100..=999).contains(&code) {
                    return Err(Exception::ValueConversion(format!(
                        "bad response code: {}",
                        code
                    )));
                }
                let code = code as u16;
                self.status = match STATUS_CODES.get(&code) {
                    Some(phrase) => format!("{} {}", code, phrase),
                    None => code.to_string(),
                };
            }
            StatusValue::Text(text) => {
                if !RE_STATUS.is_match(&text) {
                    return Err(Exception::ValueConversion(format!(
                        "bad response code: {}",
                        text
                    )));
                }
                self.status = text;
            }
            StatusValue::Other(desc) => {
                return Err(Exception::TypeConversion(format!(
                    "bad type of response code: {}",
                    desc
                )));
            }
        }
        Ok(())
    }

    /// 分发引擎直接写入已知合法的状态行
    pub(crate) fn set_status_line(&mut self, line: String) {
        self.status = line;
    }

    /// 设置 Cookie，同名 Cookie 会被覆盖
    pub fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.cookies
            .insert(name.to_string(), options.serialize(name, value));
    }

    /// 让浏览器删除 Cookie：值设为 `__deleted__`，过期时间设为 Unix 纪元
    pub fn delete_cookie(&mut self, name: &str) {
        let options = CookieOptions::new().expires(Expires::Timestamp(0.0));
        self.set_cookie(name, "__deleted__", &options);
    }

    /// 撤销本次响应中设置过的 Cookie
    pub fn unset_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 [`BLOCK_SIZE`] 分块惰性读取的文件
#[derive(Debug)]
pub struct FileChunks {
    file: File,
    path: PathBuf,
    size: u64,
    finished: bool,
}

impl FileChunks {
    pub fn new(file: File, path: PathBuf) -> Result<Self, Exception> {
        let size = file.metadata()?.len();
        debug!("准备分块读取文件{}，大小: {} bytes", path.display(), size);
        Ok(Self {
            file,
            path,
            size,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Iterator for FileChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.finished {
            return None;
        }
        let mut buffer = vec![0u8; BLOCK_SIZE];
        match self.file.read(&mut buffer) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                Some(Bytes::from(buffer))
            }
            Err(e) => {
                error!("读取文件{}失败: {}", self.path.display(), e);
                self.finished = true;
                None
            }
        }
    }
}

#[derive(Debug)]
enum BodyInner {
    Full(Option<Bytes>),
    File(FileChunks),
}

/// 交给网关的响应体，按块迭代
#[derive(Debug)]
pub struct Body {
    inner: BodyInner,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            inner: BodyInner::Full(None),
        }
    }

    pub fn full(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        if content.is_empty() {
            return Self::empty();
        }
        Self {
            inner: BodyInner::Full(Some(content)),
        }
    }

    pub fn file(chunks: FileChunks) -> Self {
        Self {
            inner: BodyInner::File(chunks),
        }
    }

    /// 已知的总长度（尚未迭代时）
    pub fn len(&self) -> u64 {
        match &self.inner {
            BodyInner::Full(content) => content.as_ref().map_or(0, |c| c.len() as u64),
            BodyInner::File(chunks) => chunks.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否为按块读取的文件
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner, BodyInner::File(_))
    }

    /// 读出全部内容
    pub fn into_bytes(self) -> Bytes {
        match self.inner {
            BodyInner::Full(content) => content.unwrap_or_default(),
            BodyInner::File(chunks) => {
                let mut all = Vec::new();
                for chunk in chunks {
                    all.extend_from_slice(&chunk);
                }
                Bytes::from(all)
            }
        }
    }
}

impl Iterator for Body {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        match &mut self.inner {
            BodyInner::Full(content) => content.take(),
            BodyInner::File(chunks) => chunks.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_response_new() {
        let response = Response::new();
        assert_eq!(response.status(), "200 OK");
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
        assert!(response.cookies().is_empty());
    }

    /// 验证整数状态码的转换与范围检查
    #[test]
    fn test_set_status_integer() {
        let mut response = Response::new();
        response.set_status(404).unwrap();
        assert_eq!(response.status(), "404 Not Found");
        assert_eq!(response.status_code(), 404);

        response.set_status(299u16).unwrap();
        assert_eq!(response.status(), "299");

        assert!(matches!(response.set_status(99), Err(Exception::ValueConversion(_))));
        assert!(matches!(response.set_status(1000), Err(Exception::ValueConversion(_))));
        assert_eq!(response.status(), "299");
    }

    #[test]
    fn test_set_status_string() {
        let mut response = Response::new();
        response.set_status("500 Internal Server Error").unwrap();
        assert_eq!(response.status(), "500 Internal Server Error");
        response.set_status("201").unwrap();
        assert_eq!(response.status(), "201");

        assert!(matches!(response.set_status("OK"), Err(Exception::ValueConversion(_))));
        assert!(matches!(response.set_status("20 OK"), Err(Exception::ValueConversion(_))));
        assert!(matches!(response.set_status("200 OK!"), Err(Exception::ValueConversion(_))));
    }

    #[test]
    fn test_set_status_wrong_type() {
        let mut response = Response::new();
        assert!(matches!(response.set_status(200.0), Err(Exception::TypeConversion(_))));
        assert_eq!(response.status(), "200 OK");
    }

    /// 已知头大小写不敏感并规范化，未知头原样保存
    #[test]
    fn test_header_canonicalization() {
        let mut response = Response::new();
        response.set_header("content-type", "text/plain");
        assert_eq!(response.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(response.content_type(), Some("text/plain"));

        response.set_header("x-trace", "abc");
        assert_eq!(response.header("x-trace"), Some("abc"));
        assert_eq!(response.header("X-Trace"), None);

        let headers = response.headers();
        assert!(headers.contains(&("Content-Type".to_string(), "text/plain".to_string())));
        assert!(headers.contains(&("x-trace".to_string(), "abc".to_string())));
        assert_eq!(
            headers.last(),
            Some(&("X-Powered-By".to_string(), "webframe/0.1".to_string()))
        );
    }

    #[test]
    fn test_unset_absent_header_is_noop() {
        let mut response = Response::new();
        response.unset_header("Location");
        response.unset_header("Location");
        assert_eq!(response.header("Location"), None);

        response.set_content_type(None);
        assert_eq!(response.content_type(), None);
    }

    #[test]
    fn test_content_length() {
        let mut response = Response::new();
        assert_eq!(response.content_length(), None);
        response.set_content_length(42);
        assert_eq!(response.content_length(), Some(42));
        assert_eq!(response.header("content-length"), Some("42"));
    }

    #[test]
    fn test_cookie_with_max_age() {
        let mut response = Response::new();
        response.set_cookie("s1", "ok value", &CookieOptions::new().max_age(3600));

        let cookies: Vec<_> = response
            .headers()
            .into_iter()
            .filter(|(k, _)| k == "Set-Cookie")
            .collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].1, "s1=ok%20value; Max-Age=3600; Path=/; HttpOnly");
    }

    #[test]
    fn test_cookie_expires_wins_over_max_age() {
        let mut response = Response::new();
        let options = CookieOptions::new()
            .max_age(60)
            .expires(Expires::Timestamp(0.0))
            .http_only(false);
        response.set_cookie("a", "1", &options);
        assert_eq!(
            response.cookie("a"),
            Some("a=1; Expires=Thu, 01-Jan-1970 00:00:00 GMT; Path=/")
        );
    }

    #[test]
    fn test_cookie_with_timezone_aware_expires() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let at = tz.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let mut response = Response::new();
        response.set_cookie("t", "x", &CookieOptions::new().expires(at));
        assert_eq!(
            response.cookie("t"),
            Some("t=x; Expires=Sun, 01-Mar-2026 00:00:00 GMT; Path=/; HttpOnly")
        );
    }

    #[test]
    fn test_cookie_domain_implies_secure() {
        let mut response = Response::new();
        response.set_cookie("d", "1", &CookieOptions::new().domain("example.com"));
        assert_eq!(
            response.cookie("d"),
            Some("d=1; Path=/; Domain=example.com; Secure; HttpOnly")
        );
    }

    #[test]
    fn test_delete_and_unset_cookie() {
        let mut response = Response::new();
        response.delete_cookie("sid");
        assert_eq!(
            response.cookie("sid"),
            Some("sid=__deleted__; Expires=Thu, 01-Jan-1970 00:00:00 GMT; Path=/; HttpOnly")
        );
        response.unset_cookie("sid");
        assert!(response.cookie("sid").is_none());
        response.unset_cookie("sid");
    }

    #[test]
    fn test_body_full_is_one_chunk() {
        let mut body = Body::full("hello");
        assert_eq!(body.len(), 5);
        assert_eq!(body.next(), Some(Bytes::from("hello")));
        assert_eq!(body.next(), None);

        let mut empty = Body::full("");
        assert!(empty.is_empty());
        assert_eq!(empty.next(), None);
    }

    #[test]
    fn test_file_chunks_in_blocks() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let content = vec![b'x'; BLOCK_SIZE * 2 + 10];
        tmp.write_all(&content).unwrap();
        tmp.flush().unwrap();

        let file = File::open(tmp.path()).unwrap();
        let chunks = FileChunks::new(file, tmp.path().to_path_buf()).unwrap();
        assert_eq!(chunks.size(), content.len() as u64);

        let sizes: Vec<usize> = chunks.map(|c| c.len()).collect();
        assert_eq!(sizes, vec![BLOCK_SIZE, BLOCK_SIZE, 10]);
    }

    #[test]
    fn test_body_into_bytes_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"body.{color:red}").unwrap();
        tmp.flush().unwrap();

        let file = File::open(tmp.path()).unwrap();
        let body = Body::file(FileChunks::new(file, tmp.path().to_path_buf()).unwrap());
        assert!(body.is_streaming());
        assert_eq!(body.len(), 16);
        assert_eq!(body.into_bytes(), Bytes::from("body.{color:red}"));
    }
}
