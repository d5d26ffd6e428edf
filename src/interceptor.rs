// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 拦截器链
//!
//! 拦截器是包裹在路由分发外层的中间件。每个拦截器带一个路径模式：
//! - `"/foo*"` 或 `"/foo"`：路径以 `/foo` 开头时生效；
//! - `"*foo"`：路径以 `foo` 结尾时生效。
//!
//! 其余写法（含 `?`、中间出现 `*`、两端都有 `*`、空串）在注册时报值错误。
//!
//! 生效的拦截器收到 `next`，自行决定是否调用、调用几次，以及在调用前后做什么；
//! 未生效的拦截器直接透传给 `next`。注册顺序即由外到内的嵌套顺序，返回时按相反顺序展开。

use std::{fmt, sync::Arc};

use lazy_static::lazy_static;
use regex::Regex;

use crate::{context, exception::Exception, route::Reply};

lazy_static! {
    static ref RE_STARTS_WITH: Regex = Regex::new(r"^([^\*\?]+)\*?$").unwrap();
    static ref RE_ENDS_WITH: Regex = Regex::new(r"^\*([^\*\?]+)$").unwrap();
}

/// 内层调用
pub type Next<'a> = &'a dyn Fn() -> Result<Reply, Exception>;

/// 组合完成的调用链
pub type Chain = Arc<dyn Fn() -> Result<Reply, Exception> + Send + Sync>;

type InterceptorFn = dyn Fn(Next<'_>) -> Result<Reply, Exception> + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
enum PathPredicate {
    StartsWith(String),
    EndsWith(String),
}

#[derive(Clone)]
pub struct Interceptor {
    pattern: String,
    predicate: PathPredicate,
    handler: Arc<InterceptorFn>,
}

impl Interceptor {
    pub fn new<F>(pattern: &str, handler: F) -> Result<Self, Exception>
    where
        F: Fn(Next<'_>) -> Result<Reply, Exception> + Send + Sync + 'static,
    {
        let predicate = if let Some(caps) = RE_STARTS_WITH.captures(pattern) {
            PathPredicate::StartsWith(caps[1].to_string())
        } else if let Some(caps) = RE_ENDS_WITH.captures(pattern) {
            PathPredicate::EndsWith(caps[1].to_string())
        } else {
            return Err(Exception::ValueConversion(format!(
                "invalid interceptor pattern: {:?}",
                pattern
            )));
        };
        Ok(Self {
            pattern: pattern.to_string(),
            predicate,
            handler: Arc::new(handler),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.predicate {
            PathPredicate::StartsWith(prefix) => path.starts_with(prefix.as_str()),
            PathPredicate::EndsWith(suffix) => path.ends_with(suffix.as_str()),
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interceptor({})", self.pattern)
    }
}

/// 从右向左把拦截器逐层包裹在 `last` 外面。
///
/// 是否生效在每次调用时根据当前请求的路径判断；线程上没有绑定请求上下文时全部透传。
pub fn build_chain(last: Chain, interceptors: &[Interceptor]) -> Chain {
    interceptors.iter().rev().fold(last, |next, interceptor| {
        let interceptor = interceptor.clone();
        Arc::new(move || {
            let hit = context::with_request(|r| interceptor.matches(r.path_info())).unwrap_or(false);
            if hit {
                (interceptor.handler)(&*next)
            } else {
                next()
            }
        })
    })
}
