// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 网关
//!
//! 把分发引擎挂到 TCP 端口上的最小 HTTP/1.1 服务端：
//! 1. 在 Tokio 运行时上接收连接、读取并解析请求报文，转换为 [`Environ`]；
//! 2. 用 `spawn_blocking` 在阻塞线程池里执行同步的 [`Dispatcher::call`]，
//!    每次调用独占一个线程，线程局部的请求上下文因此互不干扰；
//! 3. 响应头与响应体分块通过通道送回异步任务写入 Socket。
//!
//! 每个连接只处理一个请求（`Connection: close`）。
//! 报文本身不合法时直接返回 400，请求体超过上限时返回 413，都不会进入分发。
//! 内存中的文本响应体按客户端的 `Accept-Encoding` 压缩，文件流不压缩。

use std::{
    io::{self, Cursor, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::{mpsc, Notify},
};

use crate::{
    app::Dispatcher,
    config::Config,
    exception::Exception,
    param::{HttpEncoding, HttpVersion, CRLF, SERVER_NAME},
    request::Environ,
    response::Body,
    util::HtmlBuilder,
};

/// 请求行加请求头的最大长度
const MAX_HEAD_SIZE: usize = 16384;

/// 解析后的请求行与请求头
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    method: String,
    target: String,
    version: HttpVersion,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 按名称查询请求头，大小写不敏感
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Result<usize, Exception> {
        match self.header("Content-Length") {
            Some(len) => len.trim().parse().map_err(|_| Exception::MalformedRequest),
            None => Ok(0),
        }
    }

    /// 客户端支持的压缩算法，按出现顺序；`q=0` 的算法视为拒绝
    pub fn accept_encoding(&self) -> Vec<HttpEncoding> {
        let mut encodings = vec![];
        let value = match self.header("Accept-Encoding") {
            Some(value) => value,
            None => return encodings,
        };
        for item in value.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or_default().trim().to_lowercase();
            let quality = parts
                .filter_map(|p| p.trim().split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
                .map_or(Some(1.0), |(_, q)| q.trim().parse::<f32>().ok());
            match quality {
                Some(q) if q > 0.0 => {}
                _ => continue,
            }
            let encoding = match coding.as_str() {
                "gzip" | "x-gzip" => HttpEncoding::Gzip,
                "deflate" => HttpEncoding::Deflate,
                "br" => HttpEncoding::Br,
                _ => continue,
            };
            if !encodings.contains(&encoding) {
                encodings.push(encoding);
            }
        }
        encodings
    }

    /// 转换为分发引擎使用的调用环境
    pub fn into_environ(self, body: Vec<u8>, remote_addr: &str, document_root: Option<&Path>) -> Environ {
        let (path, query) = match self.target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (self.target.clone(), String::new()),
        };
        let mut environ = Environ::new()
            .with_var("REQUEST_METHOD", &self.method.to_uppercase())
            .with_var("PATH_INFO", &path)
            .with_var("QUERY_STRING", &query)
            .with_var("SERVER_PROTOCOL", &self.version.to_string())
            .with_var("REMOTE_ADDR", remote_addr);
        if let Some(root) = document_root {
            environ.insert("DOCUMENT_ROOT", &root.to_string_lossy());
        }
        for (name, value) in &self.headers {
            let key = name.to_uppercase().replace('-', "_");
            match key.as_str() {
                "CONTENT_TYPE" | "CONTENT_LENGTH" => environ.insert(&key, value),
                _ => environ.insert(&format!("HTTP_{}", key), value),
            }
        }
        environ.with_input(Cursor::new(body))
    }
}

/// 解析请求头部分（不含结尾的空行）
pub fn parse_head(buffer: &[u8]) -> Result<RequestHead, Exception> {
    let head = std::str::from_utf8(buffer).map_err(|_| Exception::RequestIsNotUtf8)?;
    let mut lines = head.split(CRLF);

    let request_line = lines.next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        debug!("HTTP请求行格式不正确：{}", request_line);
        return Err(Exception::MalformedRequest);
    }
    let version = match parts[2].to_uppercase().as_str() {
        "HTTP/1.1" => HttpVersion::V1_1,
        "HTTP/1.0" => HttpVersion::V1_0,
        other => {
            debug!("不支持的HTTP协议版本：{}", other);
            return Err(Exception::UnsupportedHttpVersion);
        }
    };

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(Exception::MalformedRequest)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Exception::MalformedRequest);
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: parts[0].to_string(),
        target: parts[1].to_string(),
        version,
        headers,
    })
}

/// 从流中读出一个完整请求。连接在发送任何数据之前关闭时返回 `None`。
pub async fn read_request<S>(stream: &mut S, max_body_size: usize) -> Result<Option<(RequestHead, Vec<u8>)>, Exception>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEAD_SIZE {
            return Err(Exception::MalformedRequest);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(Exception::MalformedRequest);
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = parse_head(&buffer[..head_end])?;
    let content_length = head.content_length()?;
    if content_length > max_body_size {
        return Err(Exception::PayloadTooLarge);
    }

    let mut body = buffer.split_off(head_end + 4);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..]).await?;
    }
    body.truncate(content_length);
    Ok(Some((head, body)))
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

enum Frame {
    Head {
        status: String,
        headers: Vec<(String, String)>,
    },
    Chunk(Bytes),
}

/// 在阻塞线程中执行分发，把响应头和响应体块送入通道
fn dispatch_blocking(
    dispatcher: &Dispatcher,
    environ: Environ,
    encoding: Option<HttpEncoding>,
    tx: mpsc::Sender<Frame>,
) {
    let mut head = None;
    let body = dispatcher.call(environ, |status, headers| {
        head = Some((status.to_string(), headers.to_vec()));
    });
    let (status, mut headers) = match head {
        Some(head) => head,
        None => ("500 Internal Server Error".to_string(), Vec::new()),
    };

    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let encoding = match encoding {
        Some(e) if !body.is_streaming() && !body.is_empty() && !should_skip_compression(&content_type) => Some(e),
        _ => None,
    };

    let body = match encoding {
        Some(e) => {
            let original = body.into_bytes();
            match compress(original.to_vec(), Some(e)) {
                Ok(compressed) => {
                    headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Content-Length"));
                    headers.push(("Content-Length".to_string(), compressed.len().to_string()));
                    headers.push(("Content-Encoding".to_string(), e.to_string()));
                    Body::full(compressed)
                }
                Err(err) => {
                    warn!("压缩响应体失败，改为发送原始内容: {}", err);
                    Body::full(original)
                }
            }
        }
        None => body,
    };

    if tx.blocking_send(Frame::Head { status, headers }).is_err() {
        return;
    }
    for chunk in body {
        if tx.blocking_send(Frame::Chunk(chunk)).is_err() {
            debug!("连接已关闭，停止发送响应体");
            break;
        }
    }
}

/// 网关运行参数
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub max_body_size: usize,
    pub compression: bool,
    pub document_root: Option<PathBuf>,
}

impl From<&Config> for GatewayOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_body_size: config.max_body_size(),
            compression: config.compression(),
            document_root: config.document_root(),
        }
    }
}

pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    options: GatewayOptions,
    active: AtomicUsize,
    shutdown: Notify,
}

impl Gateway {
    pub fn new(dispatcher: Arc<Dispatcher>, options: GatewayOptions) -> Self {
        Self {
            dispatcher,
            options,
            active: AtomicUsize::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 让 `serve` 停止接收新连接
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), Exception> {
        info!("网关开始在{}上接收连接", listener.local_addr()?);
        loop {
            let (mut stream, addr) = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("网关接收到停机指令，正在退出...");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("接收连接失败: {}", e);
                        continue;
                    }
                },
            };
            debug!("新的连接：{}", addr);

            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                gateway.active.fetch_add(1, Ordering::SeqCst);
                gateway.handle_connection(&mut stream, addr).await;
                gateway.active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    /// 处理单个连接上的一个请求
    pub async fn handle_connection<S>(&self, stream: &mut S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start_time = Instant::now();
        let (head, body) = match read_request(stream, self.options.max_body_size).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                let code = match e {
                    Exception::PayloadTooLarge => 413,
                    _ => 400,
                };
                warn!("[{}]拒绝请求: {}，返回{}", addr, e, code);
                let _ = stream.write_all(&simple_response(code)).await;
                let _ = stream.shutdown().await;
                return;
            }
        };

        let version = head.version();
        let encoding = if self.options.compression {
            decide_encoding(&head.accept_encoding())
        } else {
            None
        };
        let environ = head.into_environ(
            body,
            &addr.ip().to_string(),
            self.options.document_root.as_deref(),
        );

        let (tx, mut rx) = mpsc::channel::<Frame>(16);
        let dispatcher = Arc::clone(&self.dispatcher);
        let task = tokio::task::spawn_blocking(move || dispatch_blocking(&dispatcher, environ, encoding, tx));

        let mut sent = 0usize;
        while let Some(frame) = rx.recv().await {
            let bytes = match frame {
                Frame::Head { status, headers } => Bytes::from(format_head(version, &status, &headers)),
                Frame::Chunk(chunk) => {
                    sent += chunk.len();
                    chunk
                }
            };
            if let Err(e) = stream.write_all(&bytes).await {
                error!("[{}]写入响应失败: {}", addr, e);
                break;
            }
        }
        drop(rx);
        if let Err(e) = task.await {
            error!("[{}]分发任务异常退出: {}", addr, e);
        }
        let _ = stream.flush().await;
        let _ = stream.shutdown().await;
        debug!(
            "[{}]响应发送完成，响应体{}字节，用时{}ms",
            addr,
            sent,
            start_time.elapsed().as_millis()
        );
    }
}

fn format_head(version: HttpVersion, status: &str, headers: &[(String, String)]) -> String {
    let mut head = format!("{} {}{}", version, status, CRLF);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}{}", name, value, CRLF));
    }
    head.push_str(&format!("Date: {}{}", format_date(&Utc::now()), CRLF));
    head.push_str(&format!("Server: {}{}", SERVER_NAME, CRLF));
    head.push_str(&format!("Connection: close{}", CRLF));
    head.push_str(CRLF);
    head
}

/// 网关直接生成的状态页响应
pub fn simple_response(code: u16) -> Vec<u8> {
    let html = HtmlBuilder::from_status_code(code, None).build();
    let status = match crate::param::STATUS_CODES.get(&code) {
        Some(phrase) => format!("{} {}", code, phrase),
        None => code.to_string(),
    };
    let headers = vec![
        ("Content-Type".to_string(), "text/html; charset=utf-8".to_string()),
        ("Content-Length".to_string(), html.len().to_string()),
    ];
    let mut bytes = format_head(HttpVersion::V1_1, &status, &headers).into_bytes();
    bytes.extend_from_slice(html.as_bytes());
    bytes
}

/// IMF-fixdate 格式的 HTTP 日期
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/",
        "video/",
        "audio/",
        "application/zip",
        "application/gzip",
        "application/x-gzip",
        "application/octet-stream",
        "font/woff",
        "font/woff2",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

/// 按 br、gzip、deflate 的优先级选择压缩算法
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}
