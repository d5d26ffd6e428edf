// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由注册表
//!
//! 按「方法 × 静态/动态」分成四个桶：
//!
//! | 方法 | 静态（精确查找） | 动态（按注册顺序扫描） |
//! |------|------------------|------------------------|
//! | GET  | `get_static`     | `get_dynamic`          |
//! | POST | `post_static`    | `post_dynamic`         |
//!
//! 解析顺序：先查静态哈希表，命中即返回，不再扫描动态列表；否则按注册顺序
//! 逐个尝试动态路由，第一个结构匹配的胜出。
//!
//! 注册表在开始服务之前调用 [`RouteRegistry::seal`] 封存，封存后任何修改都返回配置错误。
//! 封存后的注册表只读，可以通过 `Arc` 在线程之间共享而无需加锁。

use std::collections::HashMap;

use log::{info, warn};

use crate::{
    exception::Exception,
    param::HttpRequestMethod,
    route::{Params, Route},
    signal::{bad_request, not_found},
};

#[derive(Clone, Default)]
pub struct RouteRegistry {
    get_static: HashMap<String, Route>,
    post_static: HashMap<String, Route>,
    get_dynamic: Vec<Route>,
    post_dynamic: Vec<Route>,
    sealed: bool,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: Route) -> Result<(), Exception> {
        if self.sealed {
            return Err(Exception::Configuration(format!(
                "cannot register {} after the registry is sealed",
                route
            )));
        }
        info!("Add route: {}", route);
        if route.is_static() {
            let table = match route.method() {
                HttpRequestMethod::Get => &mut self.get_static,
                HttpRequestMethod::Post => &mut self.post_static,
            };
            if let Some(previous) = table.insert(route.path().to_string(), route) {
                warn!("静态路由{}被重复注册，后注册者覆盖先注册者", previous);
            }
        } else {
            match route.method() {
                HttpRequestMethod::Get => self.get_dynamic.push(route),
                HttpRequestMethod::Post => self.post_dynamic.push(route),
            }
        }
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.get_static.len() + self.post_static.len() + self.get_dynamic.len() + self.post_dynamic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 把 `(method, path)` 解析为路由及其捕获的参数。
    ///
    /// 找不到路由时返回 404 信号，方法不是 GET/POST 时返回 400 信号。
    pub fn resolve(&self, method: &str, path: &str) -> Result<(&Route, Params), Exception> {
        let method = HttpRequestMethod::parse(method).ok_or_else(bad_request)?;
        let (table, dynamic) = match method {
            HttpRequestMethod::Get => (&self.get_static, &self.get_dynamic),
            HttpRequestMethod::Post => (&self.post_static, &self.post_dynamic),
        };

        if let Some(route) = table.get(path) {
            return Ok((route, Params::new(route.names().to_vec().into(), Vec::new())));
        }
        dynamic
            .iter()
            .find_map(|route| route.matches(path).map(|params| (route, params)))
            .ok_or_else(not_found)
    }
}
