// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块集中定义了框架在分发请求与构建响应时依赖的静态数据：
//! - HTTP 状态码及其原因短语（Reason Phrase）。
//! - 响应头的标准大小写表，用于头部名称的规范化。
//! - 文件后缀名到 MIME 类型的映射表（静态文件路由使用）。
//! - HTTP 方法、版本及编码格式的强类型枚举。

use std::collections::HashMap;
use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webframe";

/// 每个响应都会附带的 `X-Powered-By` 头
pub const POWERED_BY: (&str, &str) = ("X-Powered-By", "webframe/0.1");

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 静态文件路由的保留前缀
pub const STATIC_PREFIX: &str = "/static/";

/// 静态文件按块惰性读取时的块大小
pub const BLOCK_SIZE: usize = 8192;

/// 响应默认的内容类型
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)，
    /// 另补充了 WebDAV 等扩展中常见的几个状态码。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx: 信息响应
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");
        map.insert(102, "Processing");

        // 2xx: 成功响应
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");
        map.insert(207, "Multi Status");
        map.insert(226, "IM Used");

        // 3xx: 重定向
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(305, "Use Proxy");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx: 客户端错误
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(402, "Payment Required");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(407, "Proxy Authentication Required");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Request Entity Too Large");
        map.insert(414, "Request URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(416, "Requested Range Not Satisfiable");
        map.insert(417, "Expectation Failed");
        map.insert(418, "I'm a teapot");
        map.insert(422, "Unprocessable Entity");
        map.insert(423, "Locked");
        map.insert(424, "Failed Dependency");
        map.insert(426, "Upgrade Required");

        // 5xx: 服务端错误
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map.insert(507, "Insufficient Storage");
        map.insert(510, "Not Extended");
        map
    };
}

/// 已知响应头的标准写法。
///
/// 设置/读取/删除响应头时，名称若（忽略大小写）命中此表，则统一按表中写法输出；
/// 未命中的名称保留调用方给出的原始大小写。
pub const RESPONSE_HEADERS: [&str; 37] = [
    "Accept-Ranges",
    "Age",
    "Allow",
    "Cache-Control",
    "Connection",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Disposition",
    "Content-Range",
    "Content-Type",
    "Date",
    "ETag",
    "Expires",
    "Last-Modified",
    "Link",
    "Location",
    "Pragma",
    "Proxy-Authenticate",
    "Refresh",
    "Retry-After",
    "Server",
    "Set-Cookie",
    "Strict-Transport-Security",
    "Trailer",
    "Transfer-Encoding",
    "Vary",
    "Via",
    "Warning",
    "WWW-Authenticate",
    "X-Frame-Options",
    "X-XSS-Protection",
    "X-Content-Type-Options",
    "X-Forwarded-Proto",
    "X-UA-Compatible",
];

lazy_static! {
    /// 大写名称 -> 标准写法
    pub static ref RESPONSE_HEADER_DICT: HashMap<String, &'static str> = RESPONSE_HEADERS
        .iter()
        .map(|name| (name.to_uppercase(), *name))
        .collect();
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表。
    ///
    /// 静态文件路由据此设置 `Content-Type`，未收录的后缀一律按二进制流处理。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("avif", "image/avif");
        map.insert("bmp", "image/bmp");
        map.insert("css", "text/css");
        map.insert("csv", "text/csv");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html");
        map.insert("html", "text/html");
        map.insert("ico", "image/x-icon");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("js", "application/javascript");
        map.insert("json", "application/json");
        map.insert("map", "application/json");
        map.insert("mjs", "text/javascript");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("tar", "application/x-tar");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain");
        map.insert("wasm", "application/wasm");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 按后缀名查 MIME 类型，大小写不敏感，查不到时返回 `application/octet-stream`
pub fn mime_for(extension: &str) -> &'static str {
    MIME_TYPES
        .get(extension.to_lowercase().as_str())
        .copied()
        .unwrap_or("application/octet-stream")
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

/// 路由可以注册的 HTTP 方法。
///
/// 分发引擎只处理 GET 与 POST，其余方法在分发阶段直接得到 400。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 提交数据或执行操作
    Post,
}

impl HttpRequestMethod {
    /// 从方法名解析，大小写不敏感；不支持的方法返回 `None`
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_uppercase().as_str() {
            "GET" => Some(HttpRequestMethod::Get),
            "POST" => Some(HttpRequestMethod::Post),
            _ => None,
        }
    }
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}
