// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 信号
//!
//! 处理函数可以通过返回信号来提前结束正常流程，并指定一个确定的 HTTP 结果。
//! 信号不是故障：分发引擎会把它翻译为对应的状态行（重定向还会带上 `Location`），
//! 只记录一条 info 日志。
//!
//! 常用的信号通过本模块的辅助函数构造，它们直接返回 [`Exception`]，
//! 因此可以在处理函数里写 `return Err(not_found())`。

use std::fmt;

use crate::{exception::Exception, param::STATUS_CODES};

#[derive(Debug, Clone, PartialEq)]
pub enum HttpSignal {
    /// 以错误状态码结束请求
    HttpError { code: u16 },
    /// 重定向到 `location`，状态码为 301/302/303 之一
    Redirect { code: u16, location: String },
}

impl HttpSignal {
    pub fn code(&self) -> u16 {
        match self {
            HttpSignal::HttpError { code } => *code,
            HttpSignal::Redirect { code, .. } => *code,
        }
    }

    /// 完整状态行，例如 `404 Not Found`
    pub fn status(&self) -> String {
        let code = self.code();
        match STATUS_CODES.get(&code) {
            Some(phrase) => format!("{} {}", code, phrase),
            None => code.to_string(),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            HttpSignal::Redirect { location, .. } => Some(location),
            HttpSignal::HttpError { .. } => None,
        }
    }
}

impl fmt::Display for HttpSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpSignal::HttpError { .. } => write!(f, "{}", self.status()),
            HttpSignal::Redirect { location, .. } => write!(f, "{}, {}", self.status(), location),
        }
    }
}

impl From<HttpSignal> for Exception {
    fn from(signal: HttpSignal) -> Self {
        Exception::Signal(signal)
    }
}

pub fn http_error(code: u16) -> Exception {
    HttpSignal::HttpError { code }.into()
}

pub fn bad_request() -> Exception {
    http_error(400)
}

pub fn unauthorized() -> Exception {
    http_error(401)
}

pub fn forbidden() -> Exception {
    http_error(403)
}

pub fn not_found() -> Exception {
    http_error(404)
}

pub fn conflict() -> Exception {
    http_error(409)
}

pub fn internal_error() -> Exception {
    http_error(500)
}

/// 永久重定向（301）
pub fn redirect(location: &str) -> Exception {
    HttpSignal::Redirect { code: 301, location: location.to_string() }.into()
}

/// 临时重定向（302）
pub fn found(location: &str) -> Exception {
    HttpSignal::Redirect { code: 302, location: location.to_string() }.into()
}

/// 以 GET 方式查看其他资源（303），常用于表单提交之后
pub fn see_other(location: &str) -> Exception {
    HttpSignal::Redirect { code: 303, location: location.to_string() }.into()
}
