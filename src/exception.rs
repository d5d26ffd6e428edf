// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了框架在配置期与请求处理期可能产生的全部异常。
//!
//! ## 分类
//! - **配置错误**：启动阶段非法的路由/拦截器注册，或在封存之后继续修改。属于致命错误。
//! - **HTTP 信号**：处理函数主动返回的错误码或重定向，由分发引擎翻译为响应，不视为故障。
//! - **值/类型转换错误**：非法的状态码赋值或拦截器模式，直接返回给调用方。
//! - **内部故障**：其余一切错误（包括处理函数 panic），统一映射为 500。
//! - **报文解析错误**：网关在进入分发之前就能识别的非法请求。

use std::{any::Any, backtrace::Backtrace, cell::RefCell, fmt, io, panic, sync::Once};

use crate::{context, signal::HttpSignal};

thread_local! {
    /// 本线程最近一次请求处理期间 panic 时捕获的调用栈
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// 安装进程级 panic 钩子（只安装一次）。
///
/// 线程上绑定了请求上下文时，钩子在 panic 现场记录调用栈，供 [`Exception::from_panic`] 取用；
/// 之后照常交给原来的钩子处理。
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if context::is_bound() {
                let trace = Backtrace::force_capture().to_string();
                let _ = PANIC_TRACE.try_with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = Some(trace);
                    }
                });
            }
            previous(info);
        }));
    });
}

/// 内部故障的详细信息。
///
/// `detail` 保存构造时捕获的调用栈，只在调试模式下才会出现在响应体中。
#[derive(Debug, Clone)]
pub struct Failure {
    pub message: String,
    pub detail: String,
}

/// 框架处理过程中产生的异常类型。
#[derive(Debug, Clone)]
pub enum Exception {
    /// 非法的注册或封存后修改
    Configuration(String),
    /// 值不合法，例如状态码越界、字符串格式不符
    ValueConversion(String),
    /// 值的类型不被接受
    TypeConversion(String),
    /// 设计好的控制流信号（错误码 / 重定向）
    Signal(HttpSignal),
    /// 未预期的故障
    Internal(Failure),
    /// 请求字节流无法解析为合法的 UTF-8 字符串
    RequestIsNotUtf8,
    /// 请求行或请求头格式不正确
    MalformedRequest,
    /// 不支持的 HTTP 协议版本
    UnsupportedHttpVersion,
    /// 请求体超过配置的上限
    PayloadTooLarge,
}

impl Failure {
    /// 捕获当前调用栈
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Backtrace::force_capture().to_string(),
        }
    }
}

impl Exception {
    /// 构造一个内部故障并捕获当前调用栈
    pub fn internal(message: impl Into<String>) -> Self {
        Exception::Internal(Failure::new(message))
    }

    /// 将 `catch_unwind` 得到的 panic 负载转换为内部故障，带上钩子在 panic 现场记录的调用栈
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        let detail = PANIC_TRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_default();
        Exception::Internal(Failure {
            message: format!("panic: {}", message),
            detail,
        })
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, Exception::Signal(_))
    }
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ValueConversion(msg) => write!(f, "Bad value: {}", msg),
            TypeConversion(msg) => write!(f, "Bad type: {}", msg),
            Signal(signal) => write!(f, "{}", signal),
            Internal(failure) => write!(f, "{}", failure.message),
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            PayloadTooLarge => write!(f, "Request payload too large"),
        }
    }
}

impl std::error::Error for Exception {}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Exception::internal(format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for Exception {
    fn from(e: serde_json::Error) -> Self {
        Exception::internal(format!("JSON error: {}", e))
    }
}
