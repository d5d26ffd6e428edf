// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板渲染接口
//!
//! 处理函数可以返回 [`Template`]（模板名 + 数据模型），分发引擎在成功路径上把它交给
//! 应用配置的 [`TemplateEngine`] 渲染为字节。
//!
//! 内置的 [`DirectoryTemplateEngine`] 只支持最简单的 `{{ key }}` 占位符替换：
//! - 键可以用 `.` 访问嵌套对象，例如 `{{ user.name }}`；
//! - 替换结果一律做 HTML 转义；
//! - 模型中不存在的键替换为空字符串。
//!
//! 需要更完整模板语言的应用可以自行实现 `TemplateEngine`。

use std::{fs, path::PathBuf};

use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::{
    exception::Exception,
    route::{Handler, Params, Reply},
    util::escape_html,
};

lazy_static! {
    static ref RE_PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}").unwrap();
}

/// 待渲染的模板
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    model: Map<String, Value>,
}

impl Template {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            model: Map::new(),
        }
    }

    pub fn from_model(name: &str, model: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            model,
        }
    }

    /// 向模型中添加一项
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.model.insert(key.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Map<String, Value> {
        &self.model
    }
}

/// 模板引擎。应用级共享，必须可以跨线程使用。
#[cfg_attr(test, mockall::automock)]
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, model: &Map<String, Value>) -> Result<Vec<u8>, Exception>;
}

/// 从目录中读取模板文件的引擎
#[derive(Debug, Clone)]
pub struct DirectoryTemplateEngine {
    root: PathBuf,
}

impl DirectoryTemplateEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl TemplateEngine for DirectoryTemplateEngine {
    fn render(&self, name: &str, model: &Map<String, Value>) -> Result<Vec<u8>, Exception> {
        if name.split('/').any(|part| part == "..") {
            return Err(Exception::internal(format!("illegal template name: {}", name)));
        }
        let path = self.root.join(name);
        let source = fs::read_to_string(&path).map_err(|e| {
            Exception::internal(format!("cannot load template {}: {}", path.display(), e))
        })?;
        debug!("渲染模板{}", path.display());

        let rendered = RE_PLACEHOLDER.replace_all(&source, |caps: &Captures| {
            lookup(model, &caps[1]).map(render_value).unwrap_or_default()
        });
        Ok(rendered.into_owned().into_bytes())
    }
}

fn lookup<'a>(model: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut value = model.get(parts.next()?)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_html(s),
        other => escape_html(&other.to_string()),
    }
}

/// 把返回 JSON 对象的函数适配为渲染模板的处理函数
pub struct View<F> {
    name: String,
    f: F,
}

impl<F> Handler for View<F>
where
    F: Fn(&Params) -> Result<Value, Exception> + Send + Sync,
{
    fn invoke(&self, params: &Params) -> Result<Reply, Exception> {
        match (self.f)(params)? {
            Value::Object(model) => Ok(Reply::Template(Template::from_model(&self.name, model))),
            other => Err(Exception::ValueConversion(format!(
                "view {} expects an object model, got {}",
                self.name, other
            ))),
        }
    }
}

pub fn view<F>(name: &str, f: F) -> View<F>
where
    F: Fn(&Params) -> Result<Value, Exception> + Send + Sync,
{
    View {
        name: name.to_string(),
        f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with(name: &str, source: &str) -> (tempfile::TempDir, DirectoryTemplateEngine) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(name), source).unwrap();
        let engine = DirectoryTemplateEngine::new(dir.path());
        (dir, engine)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected object"),
        }
    }

    #[test]
    fn test_template_model() {
        let t = Template::new("hello.html").with("title", "Hello").with("year", 2012);
        assert_eq!(t.name(), "hello.html");
        assert_eq!(t.model().get("title"), Some(&json!("Hello")));
        assert_eq!(t.model().get("year"), Some(&json!(2012)));
    }

    #[test]
    fn test_render_placeholders() {
        let (_dir, engine) = engine_with("page.html", "<h1>{{ title }}</h1><p>{{user.name}} {{ n }}{{ missing }}</p>");
        let model = object(json!({"title": "Hi", "user": {"name": "Bob"}, "n": 3}));
        let out = engine.render("page.html", &model).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<h1>Hi</h1><p>Bob 3</p>");
    }

    /// 替换结果需要经过 HTML 转义
    #[test]
    fn test_render_escapes_html() {
        let (_dir, engine) = engine_with("x.html", "{{ v }}");
        let model = object(json!({"v": "<script>\"&\"</script>"}));
        let out = engine.render("x.html", &model).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "&lt;script&gt;&quot;&amp;&quot;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_render_missing_template_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DirectoryTemplateEngine::new(dir.path());
        assert!(matches!(engine.render("nope.html", &Map::new()), Err(Exception::Internal(_))));
        assert!(matches!(engine.render("../etc/passwd", &Map::new()), Err(Exception::Internal(_))));
    }

    #[test]
    fn test_view_adapter() {
        let handler = view("blog.html", |p| Ok(json!({ "id": p.at(0).unwrap_or_default() })));
        let params = Params::new(Arc::from(vec!["id".to_string()]), vec!["42".to_string()]);
        match handler.invoke(&params).unwrap() {
            Reply::Template(t) => {
                assert_eq!(t.name(), "blog.html");
                assert_eq!(t.model().get("id"), Some(&json!("42")));
            }
            other => panic!("Expected template reply, got {:?}", other),
        }
    }

    #[test]
    fn test_view_rejects_non_object() {
        let handler = view("blog.html", |_| Ok(json!([1, 2, 3])));
        let params = Params::new(Arc::from(Vec::<String>::new()), Vec::new());
        assert!(matches!(handler.invoke(&params), Err(Exception::ValueConversion(_))));
    }

    #[test]
    fn test_mock_engine() {
        let mut engine = MockTemplateEngine::new();
        engine
            .expect_render()
            .withf(|name, _| name.to_string() == "a.html")
            .times(1)
            .returning(|_, _| Ok(b"rendered".to_vec()));
        assert_eq!(engine.render("a.html", &Map::new()).unwrap(), b"rendered".to_vec());
    }
}
