use std::{fs, io::Cursor, path::Path, sync::Arc};

use serde_json::json;
use webframe::{
    context, plain,
    signal::see_other,
    view, with_params, Application, CookieOptions, DirectoryTemplateEngine, Dispatcher, Environ,
    Exception, Next, Reply,
};

struct Captured {
    status: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn dispatch(dispatcher: &Dispatcher, environ: Environ) -> Captured {
    let mut head = None;
    let body = dispatcher.call(environ, |status, headers| {
        head = Some((status.to_string(), headers.to_vec()));
    });
    let body: Vec<u8> = body.flat_map(|chunk| chunk.to_vec()).collect();
    let (status, headers) = head.expect("start_response must be called");
    Captured { status, headers, body }
}

fn get(dispatcher: &Dispatcher, path: &str) -> Captured {
    dispatch(
        dispatcher,
        Environ::new()
            .with_var("REQUEST_METHOD", "GET")
            .with_var("PATH_INFO", path),
    )
}

fn site_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("static/css")).unwrap();
    fs::write(root.path().join("static/css/site.css"), "body{color:red}").unwrap();
    fs::write(root.path().join("static/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
    fs::write(root.path().join("secret.txt"), "top secret").unwrap();
    root
}

fn dispatcher_for(root: &Path, debug: bool) -> Arc<Dispatcher> {
    let mut app = Application::new(Some(root.to_path_buf()));
    app.get("/", plain(|| Ok(Reply::Text("home".to_string())))).unwrap();
    app.get("/about", plain(|| Ok(Reply::Text("about".to_string())))).unwrap();
    app.get(
        "/:page",
        with_params(|p| Ok(Reply::Text(format!("page {}", p.get("page").unwrap_or_default())))),
    )
    .unwrap();
    app.get(
        "/:user/:comments/list",
        with_params(|p| Ok(Reply::Text(p.values().join(",")))),
    )
    .unwrap();
    app.get("/fail", plain(|| Err(Exception::internal("connection string user:pass@db"))))
        .unwrap();
    app.get("/explode", plain(|| -> Result<Reply, Exception> { panic!("kaboom") }))
        .unwrap();
    app.dispatcher(debug).unwrap()
}

#[test]
fn test_route_precedence_end_to_end() {
    let root = site_root();
    let dispatcher = dispatcher_for(root.path(), false);

    assert_eq!(get(&dispatcher, "/about").text(), "about");
    assert_eq!(get(&dispatcher, "/contact").text(), "page contact");
    assert_eq!(get(&dispatcher, "/alice/5/list").text(), "alice,5");
    assert_eq!(get(&dispatcher, "/").text(), "home");
}

#[test]
fn test_unregistered_path_is_404_page() {
    let root = site_root();
    let dispatcher = dispatcher_for(root.path(), false);

    let resp = get(&dispatcher, "/a/b/c/d");
    assert_eq!(resp.status, "404 Not Found");
    assert_eq!(resp.text(), "<html><body><h1>404 Not Found</h1></body></html>");
}

#[test]
fn test_static_files() {
    let root = site_root();
    let dispatcher = dispatcher_for(root.path(), false);

    let css = get(&dispatcher, "/static/css/site.css");
    assert_eq!(css.status, "200 OK");
    assert_eq!(css.header("Content-Type"), Some("text/css"));
    assert_eq!(css.header("Content-Length"), Some("15"));
    assert_eq!(css.text(), "body{color:red}");

    let png = get(&dispatcher, "/static/logo.png");
    assert_eq!(png.header("Content-Type"), Some("image/png"));
    assert_eq!(png.body, vec![0x89, b'P', b'N', b'G']);

    assert_eq!(get(&dispatcher, "/static/missing.png").status, "404 Not Found");
    assert_eq!(get(&dispatcher, "/static/css").status, "404 Not Found");
    assert_eq!(get(&dispatcher, "/static/../secret.txt").status, "404 Not Found");
}

#[test]
fn test_static_route_requires_document_root() {
    let mut app = Application::new(None);
    app.get("/", plain(|| Ok(Reply::Empty))).unwrap();
    let dispatcher = app.dispatcher(false).unwrap();
    assert_eq!(get(&dispatcher, "/static/logo.png").status, "404 Not Found");
}

/// 非调试模式下 500 响应体固定，不泄露故障信息
#[test]
fn test_failure_in_production_mode() {
    let root = site_root();
    let dispatcher = dispatcher_for(root.path(), false);

    let resp = get(&dispatcher, "/fail");
    assert_eq!(resp.status, "500 Internal Server Error");
    assert_eq!(
        resp.text(),
        "<html><body><h1>500 Internal Server Error</h1></body></html>"
    );
    assert!(!resp.text().contains("user:pass"));
    assert_eq!(resp.header("X-Powered-By"), Some("webframe/0.1"));
}

#[test]
fn test_failure_in_debug_mode() {
    let root = site_root();
    let dispatcher = dispatcher_for(root.path(), true);

    let resp = get(&dispatcher, "/fail");
    assert_eq!(resp.status, "500 Internal Server Error");
    assert!(resp.text().contains("connection string user:pass@db"));

    // panic 也带上现场调用栈
    let resp = get(&dispatcher, "/explode");
    assert_eq!(resp.status, "500 Internal Server Error");
    let text = resp.text();
    assert!(text.contains("panic: kaboom"));
    let start = text.find("<pre>").unwrap() + "<pre>".len();
    let end = text.find("</pre>").unwrap();
    assert!(!text[start..end].trim().is_empty());
}

#[test]
fn test_templates_and_forms() {
    let templates = tempfile::tempdir().unwrap();
    fs::write(
        templates.path().join("greet.html"),
        "<p>Hello {{ name }}, you are {{ age }}</p>",
    )
    .unwrap();

    let mut app = Application::new(None);
    app.set_template_engine(DirectoryTemplateEngine::new(templates.path()))
        .unwrap();
    app.post(
        "/greet",
        view("greet.html", |_| {
            let form = context::with_request(|r| r.input(&[("age", "unknown")]))??;
            Ok(json!({ "name": form.get("name"), "age": form.get("age") }))
        }),
    )
    .unwrap();
    app.post("/login", plain(|| Err(see_other("/home")))).unwrap();
    let dispatcher = app.dispatcher(false).unwrap();

    let body = "name=%3Cb%3EBob%3C%2Fb%3E";
    let resp = dispatch(
        &dispatcher,
        Environ::new()
            .with_var("REQUEST_METHOD", "POST")
            .with_var("PATH_INFO", "/greet")
            .with_var("CONTENT_TYPE", "application/x-www-form-urlencoded")
            .with_var("CONTENT_LENGTH", &body.len().to_string())
            .with_input(Cursor::new(body.as_bytes().to_vec())),
    );
    assert_eq!(resp.status, "200 OK");
    assert_eq!(resp.text(), "<p>Hello &lt;b&gt;Bob&lt;/b&gt;, you are unknown</p>");

    let redirect = dispatch(
        &dispatcher,
        Environ::new()
            .with_var("REQUEST_METHOD", "POST")
            .with_var("PATH_INFO", "/login"),
    );
    assert_eq!(redirect.status, "303 See Other");
    assert_eq!(redirect.header("Location"), Some("/home"));
    assert!(redirect.body.is_empty());
}

#[test]
fn test_cookies_and_status_from_handler() {
    let mut app = Application::new(None);
    app.get(
        "/session",
        plain(|| {
            let sid = context::with_request(|r| r.cookie("sid").map(|s| s.to_string()))?;
            context::with_response(|r| -> Result<(), Exception> {
                r.set_cookie("s1", "ok value", &CookieOptions::new().max_age(3600));
                r.delete_cookie("old");
                r.set_status(201)?;
                Ok(())
            })??;
            Ok(Reply::Text(sid.unwrap_or_default()))
        }),
    )
    .unwrap();
    let dispatcher = app.dispatcher(false).unwrap();

    let resp = dispatch(
        &dispatcher,
        Environ::new()
            .with_var("REQUEST_METHOD", "GET")
            .with_var("PATH_INFO", "/session")
            .with_var("HTTP_COOKIE", "sid=abc123; theme=dark"),
    );
    assert_eq!(resp.status, "201 Created");
    assert_eq!(resp.text(), "abc123");
    let cookies = resp.all("Set-Cookie");
    assert_eq!(cookies.len(), 2);
    assert!(cookies.contains(&"s1=ok%20value; Max-Age=3600; Path=/; HttpOnly"));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("old=__deleted__; Expires=Thu, 01-Jan-1970 00:00:00 GMT")));
}

#[test]
fn test_interceptor_wraps_dispatch() {
    let mut app = Application::new(None);
    app.add_interceptor("/manage/", |next: Next<'_>| {
        let user = context::with_request(|r| r.cookie("user").map(|u| u.to_string()))?;
        match user {
            Some(_) => next(),
            None => Err(see_other("/signin")),
        }
    })
    .unwrap();
    app.add_interceptor("*.json", |next: Next<'_>| {
        context::with_response(|r| r.set_header("Cache-Control", "no-cache"))?;
        next()
    })
    .unwrap();
    app.get("/manage/users", plain(|| Ok(Reply::Text("users".to_string())))).unwrap();
    app.get("/data.json", plain(|| Ok(Reply::Json(json!([1, 2]))))).unwrap();
    let dispatcher = app.dispatcher(false).unwrap();

    let denied = get(&dispatcher, "/manage/users");
    assert_eq!(denied.status, "303 See Other");
    assert_eq!(denied.header("Location"), Some("/signin"));

    let allowed = dispatch(
        &dispatcher,
        Environ::new()
            .with_var("REQUEST_METHOD", "GET")
            .with_var("PATH_INFO", "/manage/users")
            .with_var("HTTP_COOKIE", "user=admin"),
    );
    assert_eq!(allowed.text(), "users");

    let data = get(&dispatcher, "/data.json");
    assert_eq!(data.header("Cache-Control"), Some("no-cache"));
    assert_eq!(data.header("Content-Type"), Some("application/json"));
    assert_eq!(data.text(), "[1,2]");
}
