// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求上下文
//!
//! 每个正在处理的请求都有一份独立的上下文：应用信息、请求视图、响应构建器。
//! 上下文存放在线程局部槽位中，处理函数和拦截器可以随时通过本模块的函数读取，
//! 而不需要在函数签名中层层传递。
//!
//! ## 生命周期
//! 分发引擎在请求开始时调用 [`bind`] 绑定上下文，得到一个 [`ContextGuard`]；
//! guard 被 drop 时上下文被解除绑定。无论处理过程是正常返回、返回信号、返回故障还是 panic，
//! drop 都会执行，因此线程池复用线程时不会残留上一个请求的状态。
//!
//! ## 隔离性
//! 槽位是线程局部的，`RequestContext` 也不是 `Send`，并发请求之间无法观察到彼此的上下文。

use std::{
    cell::RefCell,
    marker::PhantomData,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use crate::{exception::Exception, request::Request, response::Response};

/// 应用级的只读信息，所有请求共享
#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    document_root: Option<PathBuf>,
    debug: bool,
}

impl AppInfo {
    pub fn new(document_root: Option<PathBuf>, debug: bool) -> Self {
        Self { document_root, debug }
    }

    pub fn document_root(&self) -> Option<&Path> {
        self.document_root.as_deref()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

pub struct RequestContext {
    id: u64,
    application: Arc<AppInfo>,
    request: Request,
    response: RefCell<Response>,
}

impl RequestContext {
    pub fn new(id: u64, application: Arc<AppInfo>, request: Request) -> Self {
        Self {
            id,
            application,
            request,
            response: RefCell::new(Response::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn application(&self) -> &Arc<AppInfo> {
        &self.application
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &RefCell<Response> {
        &self.response
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<RequestContext>>> = const { RefCell::new(None) };
}

/// 上下文绑定凭据，drop 时恢复绑定之前的状态
pub struct ContextGuard {
    previous: Option<Rc<RequestContext>>,
    // 绑定与解绑必须发生在同一线程
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// 把上下文绑定到当前线程
pub fn bind(context: Rc<RequestContext>) -> ContextGuard {
    let previous = CURRENT.with(|slot| slot.borrow_mut().replace(context));
    ContextGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// 当前线程上绑定的上下文
pub fn current() -> Option<Rc<RequestContext>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// 当前线程是否绑定了上下文。线程销毁阶段（例如 panic 钩子中）也可以安全调用。
pub fn is_bound() -> bool {
    CURRENT
        .try_with(|slot| slot.try_borrow().map_or(false, |ctx| ctx.is_some()))
        .unwrap_or(false)
}

fn require() -> Result<Rc<RequestContext>, Exception> {
    current().ok_or_else(|| Exception::internal("no request context bound to this thread"))
}

/// 只读访问当前请求
pub fn with_request<R>(f: impl FnOnce(&Request) -> R) -> Result<R, Exception> {
    let ctx = require()?;
    Ok(f(&ctx.request))
}

/// 修改当前响应。闭包内不能再次调用 `with_response`。
pub fn with_response<R>(f: impl FnOnce(&mut Response) -> R) -> Result<R, Exception> {
    let ctx = require()?;
    let mut response = ctx
        .response
        .try_borrow_mut()
        .map_err(|_| Exception::internal("response is already borrowed"))?;
    Ok(f(&mut response))
}

pub fn application() -> Result<Arc<AppInfo>, Exception> {
    Ok(require()?.application.clone())
}

/// 当前请求的编号，用于日志
pub fn request_id() -> Option<u64> {
    current().map(|ctx| ctx.id)
}
