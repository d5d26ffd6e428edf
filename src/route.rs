// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由与路径模式编译
//!
//! 路径模板中以 `:` 开头、后接名称的片段是变量，例如 `/:user/:comments/list`，
//! 其余字符一律按字面量处理。
//!
//! - 不含变量的模板是**静态路由**，不会编译正则，注册表按完整字符串精确查找。
//! - 含变量的模板是**动态路由**，编译为首尾锚定的正则；每个变量匹配一个或多个非 `/` 字符，
//!   捕获结果按声明顺序排列。
//!
//! 处理函数统一实现 [`Handler`]，目前有三种实现：无参处理函数 [`Plain`]、
//! 带路径参数的 [`Parametrized`]、以及静态文件处理器 [`StaticFiles`]。

use std::{fmt, fs::File, path::Component, path::Path, sync::Arc};

use bytes::Bytes;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::{
    context,
    exception::Exception,
    param::{mime_for, HttpRequestMethod, STATIC_PREFIX},
    response::FileChunks,
    signal::not_found,
    template::Template,
};

lazy_static! {
    static ref RE_ROUTE_VAR: Regex = Regex::new(r":[a-zA-Z][a-zA-Z0-9_]*").unwrap();
}

/// 动态模板编译后的匹配器
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
    names: Vec<String>,
}

impl CompiledPattern {
    /// 捕获的变量名，按声明顺序
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// 完整匹配 `path`，成功时按声明顺序返回各变量的取值
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

/// 模板是否为静态路径（不含任何变量）
pub fn is_static_template(template: &str) -> bool {
    !RE_ROUTE_VAR.is_match(template)
}

/// 把路径模板编译为匹配器。
///
/// 静态模板返回 `Ok(None)`；变量名重复等导致正则无法构建时返回配置错误。
pub fn compile_pattern(template: &str) -> Result<Option<CompiledPattern>, Exception> {
    if is_static_template(template) {
        return Ok(None);
    }

    let mut source = String::from("^");
    let mut names = Vec::new();
    let mut last = 0;
    for var in RE_ROUTE_VAR.find_iter(template) {
        push_literal(&mut source, &template[last..var.start()]);
        let name = &var.as_str()[1..];
        source.push_str(&format!("(?P<{}>[^/]+)", name));
        names.push(name.to_string());
        last = var.end();
    }
    push_literal(&mut source, &template[last..]);
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| {
        Exception::Configuration(format!("bad route template {}: {}", template, e))
    })?;
    Ok(Some(CompiledPattern { regex, names }))
}

// 字面量逐字符转义，字母数字原样保留
fn push_literal(source: &mut String, literal: &str) {
    let mut buf = [0u8; 4];
    for ch in literal.chars() {
        if ch.is_ascii_alphanumeric() {
            source.push(ch);
        } else {
            source.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
        }
    }
}

/// 一次匹配捕获到的路径参数
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    names: Arc<[String]>,
    values: Vec<String>,
}

impl Params {
    pub fn new(names: Arc<[String]>, values: Vec<String>) -> Self {
        Self { names, values }
    }

    /// 按变量名取值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .map(|v| v.as_str())
    }

    /// 按位置取值
    pub fn at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(|v| v.as_str())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 处理函数的返回值
pub enum Reply {
    /// 空响应体
    Empty,
    Text(String),
    Bytes(Bytes),
    /// 序列化为 JSON，并把内容类型设为 `application/json`
    Json(serde_json::Value),
    /// 需要交给模板引擎渲染的结果
    Template(Template),
    /// 按块惰性读取的文件
    File(FileChunks),
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Text(s.to_string())
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Text(s)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(v: Vec<u8>) -> Self {
        Reply::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Reply {
    fn from(b: Bytes) -> Self {
        Reply::Bytes(b)
    }
}

impl From<Template> for Reply {
    fn from(t: Template) -> Self {
        Reply::Template(t)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => write!(f, "Empty"),
            Reply::Text(s) => write!(f, "Text({} chars)", s.len()),
            Reply::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Reply::Json(_) => write!(f, "Json"),
            Reply::Template(t) => write!(f, "Template({})", t.name()),
            Reply::File(c) => write!(f, "File({})", c.path().display()),
        }
    }
}

/// 路由处理能力
pub trait Handler: Send + Sync {
    fn invoke(&self, params: &Params) -> Result<Reply, Exception>;
}

/// 忽略路径参数的处理函数
pub struct Plain<F>(F);

impl<F> Handler for Plain<F>
where
    F: Fn() -> Result<Reply, Exception> + Send + Sync,
{
    fn invoke(&self, _params: &Params) -> Result<Reply, Exception> {
        (self.0)()
    }
}

/// 接收路径参数的处理函数
pub struct Parametrized<F>(F);

impl<F> Handler for Parametrized<F>
where
    F: Fn(&Params) -> Result<Reply, Exception> + Send + Sync,
{
    fn invoke(&self, params: &Params) -> Result<Reply, Exception> {
        (self.0)(params)
    }
}

pub fn plain<F>(f: F) -> Plain<F>
where
    F: Fn() -> Result<Reply, Exception> + Send + Sync,
{
    Plain(f)
}

pub fn with_params<F>(f: F) -> Parametrized<F>
where
    F: Fn(&Params) -> Result<Reply, Exception> + Send + Sync,
{
    Parametrized(f)
}

/// 静态文件处理器。
///
/// 捕获的唯一参数是去掉开头 `/` 的请求路径（如 `static/js/app.js`），
/// 在当前应用的文档根目录下解析。含 `..` 的路径、目录或不存在的文件一律返回 404。
pub struct StaticFiles;

impl Handler for StaticFiles {
    fn invoke(&self, params: &Params) -> Result<Reply, Exception> {
        let relative = params.at(0).unwrap_or_default();
        let app = context::application()?;
        let root = match app.document_root() {
            Some(root) => root,
            None => return Err(not_found()),
        };

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            warn!("拒绝访问可疑的静态文件路径：{}", relative.display());
            return Err(not_found());
        }

        let full_path = root.join(relative);
        if !full_path.is_file() {
            debug!("静态文件不存在：{}", full_path.display());
            return Err(not_found());
        }

        let mime = full_path
            .extension()
            .and_then(|e| e.to_str())
            .map(mime_for)
            .unwrap_or("application/octet-stream");
        context::with_response(|r| r.set_content_type(Some(mime)))?;

        let file = File::open(&full_path)?;
        Ok(Reply::File(FileChunks::new(file, full_path)?))
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// 精确匹配，由注册表的哈希表负责
    Exact,
    Pattern(CompiledPattern),
    /// 前缀匹配，捕获去掉开头 `/` 的整个路径
    Prefix(String),
}

/// URL 与处理函数的映射
#[derive(Clone)]
pub struct Route {
    method: HttpRequestMethod,
    path: String,
    names: Arc<[String]>,
    matcher: Matcher,
    handler: Arc<dyn Handler>,
}

impl Route {
    /// 根据方法名与路径模板创建路由，方法只能是 GET 或 POST
    pub fn new(method: &str, path: &str, handler: impl Handler + 'static) -> Result<Self, Exception> {
        let method = HttpRequestMethod::parse(method).ok_or_else(|| {
            Exception::Configuration(format!("unsupported route method {} for {}", method, path))
        })?;
        if path.is_empty() {
            return Err(Exception::Configuration("empty route path".to_string()));
        }
        let (matcher, names) = match compile_pattern(path)? {
            Some(pattern) => {
                let names: Arc<[String]> = pattern.names().to_vec().into();
                (Matcher::Pattern(pattern), names)
            }
            None => (Matcher::Exact, Arc::from(Vec::<String>::new())),
        };
        Ok(Self {
            method,
            path: path.to_string(),
            names,
            matcher,
            handler: Arc::new(handler),
        })
    }

    pub fn get(path: &str, handler: impl Handler + 'static) -> Result<Self, Exception> {
        Self::new("GET", path, handler)
    }

    pub fn post(path: &str, handler: impl Handler + 'static) -> Result<Self, Exception> {
        Self::new("POST", path, handler)
    }

    /// 保留的静态文件路由：`GET /static/<rest>`
    pub fn static_files() -> Self {
        Self {
            method: HttpRequestMethod::Get,
            path: format!("{}<rest>", STATIC_PREFIX),
            names: Arc::from(vec!["rest".to_string()]),
            matcher: Matcher::Prefix(STATIC_PREFIX.to_string()),
            handler: Arc::new(StaticFiles),
        }
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_static(&self) -> bool {
        matches!(self.matcher, Matcher::Exact)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 动态路由的结构化匹配；静态路由总是返回 `None`
    pub fn matches(&self, path: &str) -> Option<Params> {
        match &self.matcher {
            Matcher::Exact => None,
            Matcher::Pattern(pattern) => pattern
                .captures(path)
                .map(|values| Params::new(self.names.clone(), values)),
            Matcher::Prefix(prefix) => {
                if path.starts_with(prefix.as_str()) && path.len() > prefix.len() {
                    Some(Params::new(self.names.clone(), vec![path[1..].to_string()]))
                } else {
                    None
                }
            }
        }
    }

    pub fn invoke(&self, params: &Params) -> Result<Reply, Exception> {
        self.handler.invoke(params)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_static() { "static" } else { "dynamic" };
        write!(f, "Route({},{},path={})", kind, self.method, self.path)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok() -> Result<Reply, Exception> {
        Ok(Reply::Empty)
    }

    #[test]
    fn test_static_template_is_not_compiled() {
        assert!(compile_pattern("/").unwrap().is_none());
        assert!(compile_pattern("/api/users").unwrap().is_none());
        // 冒号后不是字母，不构成变量
        assert!(compile_pattern("/time/12:30").unwrap().is_none());
    }

    #[test]
    fn test_captures_in_declaration_order() {
        let pattern = compile_pattern("/:user/:comments/list").unwrap().unwrap();
        assert_eq!(pattern.names(), &["user".to_string(), "comments".to_string()]);
        assert_eq!(
            pattern.captures("/alice/5/list"),
            Some(vec!["alice".to_string(), "5".to_string()])
        );
    }

    #[test]
    fn test_pattern_is_fully_anchored() {
        let pattern = compile_pattern("/path/to/:file").unwrap().unwrap();
        assert!(pattern.captures("/path/to/a.txt").is_some());
        assert!(pattern.captures("/path/to/a/b.txt").is_none());
        assert!(pattern.captures("/prefix/path/to/a.txt").is_none());
        assert!(pattern.captures("/path/to/a.txt/").is_none());
        assert!(pattern.captures("/path/to/").is_none());
    }

    #[test]
    fn test_literal_metacharacters_are_escaped() {
        let pattern = compile_pattern(":id-:pid/:w").unwrap().unwrap();
        assert_eq!(
            pattern.captures("3-4/x"),
            Some(vec!["3".to_string(), "4".to_string(), "x".to_string()])
        );

        let pattern = compile_pattern("/a.b/:x").unwrap().unwrap();
        assert!(pattern.captures("/a.b/1").is_some());
        assert!(pattern.captures("/aXb/1").is_none());

        let pattern = compile_pattern("/价格(元)/:id").unwrap().unwrap();
        assert!(pattern.captures("/价格(元)/9").is_some());
    }

    #[test]
    fn test_duplicate_variable_is_configuration_error() {
        match compile_pattern("/:id/:id") {
            Err(Exception::Configuration(_)) => {}
            other => panic!("Expected Configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_route_rejects_unknown_method() {
        match Route::new("DELETE", "/x", plain(ok)) {
            Err(Exception::Configuration(_)) => {}
            _ => panic!("Expected Configuration error"),
        }
    }

    #[test]
    fn test_route_display() {
        let route = Route::get("/", plain(ok)).unwrap();
        assert_eq!(route.to_string(), "Route(static,GET,path=/)");
        let route = Route::post("/post/:id", plain(ok)).unwrap();
        assert_eq!(route.to_string(), "Route(dynamic,POST,path=/post/:id)");
    }

    #[test]
    fn test_params_lookup() {
        let route = Route::get("/blog/:id/comments/:page", plain(ok)).unwrap();
        let params = route.matches("/blog/42/comments/3").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("page"), Some("3"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.at(1), Some("3"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_static_files_route_prefix_match() {
        let route = Route::static_files();
        assert!(!route.is_static());
        let params = route.matches("/static/js/app.js").unwrap();
        assert_eq!(params.at(0), Some("static/js/app.js"));
        assert!(route.matches("/static/").is_none());
        assert!(route.matches("/assets/app.js").is_none());
    }

    proptest! {
        /// 任意不含 `/` 的片段取值都能被原样捕获
        #[test]
        fn prop_segments_roundtrip(user in "[^/]{1,12}", page in "[0-9]{1,5}") {
            let pattern = compile_pattern("/u/:user/p/:page").unwrap().unwrap();
            let path = format!("/u/{}/p/{}", user, page);
            prop_assert_eq!(pattern.captures(&path), Some(vec![user, page]));
        }
    }
}
