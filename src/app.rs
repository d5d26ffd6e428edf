// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用与分发引擎
//!
//! [`Application`] 是启动阶段的注册入口：路由、拦截器、模板引擎都在这里登记。
//! 调用 [`Application::dispatcher`] 之后注册表被封存，拦截器链一次性组合完成，
//! 得到只读、可跨线程共享的 [`Dispatcher`]。此后任何注册都返回配置错误。
//!
//! ## 一次调用的状态流转
//! ```text
//! Idle -> ContextBound -> InterceptorChainRunning
//!      -> {Success | RedirectSignal | HttpErrorSignal | UnhandledFailure}
//!      -> ContextReleased
//! ```
//! - 成功：模板结果交给模板引擎渲染，其余结果原样输出；
//! - 重定向：设置 `Location`，响应体为空；
//! - 错误信号：保留处理函数已设置的响应头，输出极简错误页；
//! - 未处理故障（包括 panic）：500。非调试模式下响应体固定，调试模式下附带转义后的信息和调用栈。
//!
//! 无论走哪条路径，上下文都在 `call` 返回前解除绑定。

use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    rc::Rc,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};

use crate::{
    context::{self, AppInfo, RequestContext},
    exception::{Exception, Failure},
    interceptor::{build_chain, Chain, Interceptor, Next},
    param::DEFAULT_CONTENT_TYPE,
    registry::RouteRegistry,
    request::{Environ, Request},
    response::{Body, Response},
    route::{Handler, Reply, Route},
    signal::HttpSignal,
    template::TemplateEngine,
    util::{error_page, HtmlBuilder, INTERNAL_ERROR_PAGE},
};

/// 声明式的路由表：一组路由和拦截器，由 [`Application::add_module`] 一次性登记
pub trait Module {
    fn name(&self) -> &str;

    fn routes(&self) -> Result<Vec<Route>, Exception>;

    fn interceptors(&self) -> Result<Vec<Interceptor>, Exception> {
        Ok(Vec::new())
    }
}

pub struct Application {
    document_root: Option<PathBuf>,
    registry: RouteRegistry,
    interceptors: Vec<Interceptor>,
    template_engine: Option<Arc<dyn TemplateEngine>>,
    running: bool,
}

impl Application {
    /// `document_root` 不为空时，启用 `/static/` 静态文件路由
    pub fn new(document_root: Option<PathBuf>) -> Self {
        Self {
            document_root,
            registry: RouteRegistry::new(),
            interceptors: Vec::new(),
            template_engine: None,
            running: false,
        }
    }

    fn check_not_running(&self) -> Result<(), Exception> {
        if self.running {
            return Err(Exception::Configuration(
                "cannot modify the application after it started serving".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set_template_engine(&mut self, engine: impl TemplateEngine + 'static) -> Result<(), Exception> {
        self.check_not_running()?;
        self.template_engine = Some(Arc::new(engine));
        Ok(())
    }

    pub fn add_route(&mut self, route: Route) -> Result<(), Exception> {
        self.check_not_running()?;
        self.registry.register(route)
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), Exception> {
        self.add_route(Route::get(path, handler)?)
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), Exception> {
        self.add_route(Route::post(path, handler)?)
    }

    pub fn add_interceptor<F>(&mut self, pattern: &str, f: F) -> Result<(), Exception>
    where
        F: Fn(Next<'_>) -> Result<Reply, Exception> + Send + Sync + 'static,
    {
        self.check_not_running()?;
        let interceptor = Interceptor::new(pattern, f)?;
        info!("Add interceptor: {}", interceptor.pattern());
        self.interceptors.push(interceptor);
        Ok(())
    }

    pub fn add_module(&mut self, module: &dyn Module) -> Result<(), Exception> {
        self.check_not_running()?;
        info!("Add module: {}", module.name());
        for route in module.routes()? {
            self.add_route(route)?;
        }
        for interceptor in module.interceptors()? {
            info!("Add interceptor: {}", interceptor.pattern());
            self.interceptors.push(interceptor);
        }
        Ok(())
    }

    pub fn route_count(&self) -> usize {
        self.registry.len()
    }

    /// 封存注册表并组合拦截器链，之后应用不能再被修改
    pub fn dispatcher(&mut self, debug: bool) -> Result<Arc<Dispatcher>, Exception> {
        self.check_not_running()?;
        if self.document_root.is_some() {
            self.registry.register(Route::static_files())?;
        }
        self.registry.seal();
        self.running = true;
        crate::exception::install_panic_hook();

        let registry = Arc::new(self.registry.clone());
        let resolver: Chain = Arc::new(move || {
            let (method, path) =
                context::with_request(|r| (r.method().to_string(), r.path_info().to_string()))?;
            let (route, params) = registry.resolve(&method, &path)?;
            debug!("[ID{}]命中路由 {}", context::request_id().unwrap_or_default(), route);
            route.invoke(&params)
        });
        let chain = build_chain(resolver, &self.interceptors);

        info!(
            "应用已就绪：{}条路由，{}个拦截器，调试模式：{}",
            self.registry.len(),
            self.interceptors.len(),
            debug
        );
        Ok(Arc::new(Dispatcher {
            application: Arc::new(AppInfo::new(self.document_root.clone(), debug)),
            chain,
            template_engine: self.template_engine.clone(),
            next_id: AtomicU64::new(0),
        }))
    }
}

/// 封存后的分发引擎，多个线程可以同时调用 [`Dispatcher::call`]
pub struct Dispatcher {
    application: Arc<AppInfo>,
    chain: Chain,
    template_engine: Option<Arc<dyn TemplateEngine>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn debug(&self) -> bool {
        self.application.debug()
    }

    /// 处理一次调用。
    ///
    /// `start_response` 在产出任何响应体之前以 `(状态行, 响应头)` 被调用恰好一次。
    pub fn call<F>(&self, environ: Environ, start_response: F) -> Body
    where
        F: FnOnce(&str, &[(String, String)]),
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Rc::new(RequestContext::new(
            id,
            self.application.clone(),
            Request::from_environ(environ),
        ));
        let _guard = context::bind(ctx.clone());
        debug!(
            "[ID{}]开始分发 {} {}",
            id,
            ctx.request().method(),
            ctx.request().path_info()
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let reply = (self.chain)()?;
            self.render(reply)
        }))
        .unwrap_or_else(|payload| Err(Exception::from_panic(payload)));

        let mut response = ctx.response().borrow_mut();
        let body = match outcome {
            Ok(body) => body,
            Err(Exception::Signal(signal)) => {
                info!("[ID{}]HttpSignal: {}", id, signal);
                response.set_status_line(signal.status());
                match &signal {
                    HttpSignal::Redirect { location, .. } => {
                        response.set_header("Location", location);
                        Body::empty()
                    }
                    HttpSignal::HttpError { .. } => {
                        response.set_content_type(Some(DEFAULT_CONTENT_TYPE));
                        Body::full(error_page(&signal.status()))
                    }
                }
            }
            Err(e) => {
                let failure = match e {
                    Exception::Internal(failure) => failure,
                    other => Failure {
                        message: other.to_string(),
                        detail: String::new(),
                    },
                };
                self.fail(&ctx, &mut response, failure)
            }
        };
        // 响应头里的换行会被当作报文分隔符写到线路上
        let body = match response
            .headers()
            .into_iter()
            .find(|(name, value)| has_line_break(name) || has_line_break(value))
        {
            Some((name, _)) => {
                let failure = Failure::new(format!("response header {} contains a line break", name));
                self.fail(&ctx, &mut response, failure)
            }
            None => body,
        };
        response.set_content_length(body.len());

        info!(
            "[ID{}] {}, {}, {}",
            id,
            ctx.request().method(),
            ctx.request().path_info(),
            response.status()
        );
        start_response(response.status(), &response.headers());
        body
    }

    /// 记录故障并把响应替换为全新的 500 响应
    fn fail(&self, ctx: &RequestContext, response: &mut Response, failure: Failure) -> Body {
        error!(
            "[ID{}]处理请求{}时发生未处理的故障: {}\n{}",
            ctx.id(),
            ctx.request().path_info(),
            failure.message,
            failure.detail
        );
        *response = Response::new();
        response.set_status_line("500 Internal Server Error".to_string());
        if self.debug() {
            Body::full(HtmlBuilder::from_failure(&failure).build())
        } else {
            Body::full(INTERNAL_ERROR_PAGE)
        }
    }

    fn render(&self, reply: Reply) -> Result<Body, Exception> {
        let body = match reply {
            Reply::Empty => Body::empty(),
            Reply::Text(text) => Body::full(text),
            Reply::Bytes(bytes) => Body::full(bytes),
            Reply::Json(value) => {
                let content = serde_json::to_vec(&value)?;
                context::with_response(|r| r.set_content_type(Some("application/json")))?;
                Body::full(content)
            }
            Reply::Template(template) => {
                let engine = self.template_engine.as_ref().ok_or_else(|| {
                    Exception::internal(format!(
                        "no template engine configured to render {}",
                        template.name()
                    ))
                })?;
                Body::full(engine.render(template.name(), template.model())?)
            }
            Reply::File(chunks) => {
                if chunks.size() == 0 {
                    warn!("静态文件{}为空", chunks.path().display());
                }
                Body::file(chunks)
            }
        };
        Ok(body)
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n'])
}
