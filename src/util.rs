// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTML 工具
//!
//! 分发引擎和网关自己生成的页面：信号对应的极简错误页、调试模式下的 500 详情页，
//! 以及网关在进入分发前直接拒绝请求时使用的状态页。

use crate::{exception::Failure, param::STATUS_CODES};

/// 非调试模式下 500 响应的固定响应体
pub const INTERNAL_ERROR_PAGE: &str = "<html><body><h1>500 Internal Server Error</h1></body></html>";

/// 转义 HTML 特殊字符
pub fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// 信号错误页，例如 `<html><body><h1>404 Not Found</h1></body></html>`
pub fn error_page(status: &str) -> String {
    format!("<html><body><h1>{}</h1></body></html>", escape_html(status))
}

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    /// 状态页。`note` 为空时使用状态码的原因短语。
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let description = match note {
            Some(n) => n,
            None => STATUS_CODES.get(&code).copied().unwrap_or("Unknown Status"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code,
            escape_html(description)
        );
        Self {
            title: code.to_string(),
            css: r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
            .to_string(),
            body,
        }
    }

    /// 调试模式下的 500 页，带转义后的故障信息与调用栈
    pub fn from_failure(failure: &Failure) -> Self {
        let body = format!(
            r"
            <h1>500 Internal Server Error</h1>
            <h3>{}</h3>
            <div class='stack'><pre>{}</pre></div>
            ",
            escape_html(&failure.message),
            escape_html(&failure.detail)
        );
        Self {
            title: "500 Internal Server Error".to_string(),
            css: r"
            .stack {
                font-family: Monaco, Menlo, Consolas, 'Courier New', monospace;
            }
            "
            .to_string(),
            body,
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}
