// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # webframe 演示服务
//!
//! 加载配置，注册一组示例路由与拦截器，并通过内置网关对外提供服务。
//! 后台管理控制台支持 `stop`、`status`、`help` 三个指令。

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
    time::Instant,
};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
};

use webframe::{
    context,
    gateway::{Gateway, GatewayOptions},
    plain,
    signal::{not_found, see_other},
    view, with_params, Application, Config, CookieOptions, DirectoryTemplateEngine, Exception,
    Interceptor, Module, Next, Reply, Route,
};

/// 示例站点
struct Site {
    with_templates: bool,
}

impl Module for Site {
    fn name(&self) -> &str {
        "site"
    }

    fn routes(&self) -> Result<Vec<Route>, Exception> {
        let mut routes = vec![
            Route::get(
                "/hello/:name",
                with_params(|p| Ok(Reply::Text(format!("Hello, {}!", p.get("name").unwrap_or("world"))))),
            )?,
            Route::get(
                "/api/time",
                plain(|| Ok(Reply::Json(json!({ "time": chrono::Utc::now().to_rfc3339() })))),
            )?,
            Route::post(
                "/echo",
                plain(|| {
                    let input = context::with_request(|r| r.input(&[("message", "")]))??;
                    context::with_response(|r| {
                        r.set_cookie("last_echo", &input["message"], &CookieOptions::new().max_age(3600))
                    })?;
                    Ok(Reply::Json(json!(input)))
                }),
            )?,
            Route::get("/old", plain(|| Err(see_other("/"))))?,
            Route::get(
                "/user/:id",
                with_params(|p| match p.get("id").and_then(|id| id.parse::<u32>().ok()) {
                    Some(id) => Ok(Reply::Json(json!({ "id": id }))),
                    None => Err(not_found()),
                }),
            )?,
        ];
        if self.with_templates {
            routes.push(Route::get(
                "/",
                view("index.html", |_| {
                    let ua = context::with_request(|r| r.header("User-Agent").unwrap_or("unknown").to_string())?;
                    Ok(json!({ "title": "webframe", "user_agent": ua }))
                }),
            )?);
        } else {
            routes.push(Route::get("/", plain(|| Ok(Reply::Text("<h1>webframe</h1>".to_string()))))?);
        }
        Ok(routes)
    }

    fn interceptors(&self) -> Result<Vec<Interceptor>, Exception> {
        Ok(vec![Interceptor::new("/api*", |next: Next<'_>| {
            let start = Instant::now();
            let result = next();
            info!(
                "[ID{}]API调用用时{}us",
                context::request_id().unwrap_or_default(),
                start.elapsed().as_micros()
            );
            result
        })?])
    }
}

fn init_logging() {
    if log4rs::init_file("config/log4rs.yaml", Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("无法初始化日志系统: {}", e);
            }
        }
        Err(e) => eprintln!("无法构建默认日志配置: {}", e),
    }
    warn!("未找到config/log4rs.yaml，使用控制台日志");
}

fn build_application(config: &Config) -> Result<Application, Exception> {
    let mut app = Application::new(config.document_root());
    let template_dir = config.template_dir();
    if let Some(dir) = &template_dir {
        info!("模板目录: {}", dir.display());
        app.set_template_engine(DirectoryTemplateEngine::new(dir.clone()))?;
    }
    app.add_interceptor("/*", |next: Next<'_>| {
        let result = next();
        if let Err(e) = &result {
            if !e.is_signal() {
                warn!("[ID{}]请求处理失败: {}", context::request_id().unwrap_or_default(), e);
            }
        }
        result
    })?;
    app.add_module(&Site {
        with_templates: template_dir.is_some(),
    })?;
    Ok(app)
}

async fn run(gateway: Arc<Gateway>, socket: SocketAddrV4) -> Result<(), Exception> {
    let listener = TcpListener::bind(socket).await?;
    info!("端口{}绑定完成", socket.port());

    // 后台管理控制台
    tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move {
            let mut reader = BufReader::new(tokio::io::stdin());
            let mut input = String::new();
            loop {
                input.clear();
                match reader.read_line(&mut input).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                match input.trim() {
                    "stop" => {
                        gateway.stop();
                        println!("停机指令已激活，服务器将停止接收新连接...");
                        break;
                    }
                    "help" => {
                        println!("== webframe Help ==");
                        println!("stop   - 发出停机信号");
                        println!("status - 查看当前服务器运行状态");
                        println!("help   - 显示此帮助信息");
                        println!("===================");
                    }
                    "status" => {
                        println!("== webframe 状态 ===");
                        println!("当前活跃连接数: {}", gateway.active_connections());
                        println!("===================");
                    }
                    cmd => println!("无效的命令：{}", cmd),
                }
            }
        }
    });

    gateway.serve(listener).await
}

fn main() {
    init_logging();

    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let dispatcher = match build_application(&config).and_then(|mut app| app.dispatcher(config.debug())) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("应用初始化失败: {}", e);
            process::exit(1);
        }
    };

    let runtime = match Builder::new_multi_thread()
        .max_blocking_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时: {}", e);
            process::exit(1);
        }
    };

    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, config.port());
    let gateway = Arc::new(Gateway::new(dispatcher, GatewayOptions::from(&config)));

    let result = runtime.block_on(run(gateway, socket));

    if let Err(e) = result {
        error!("服务异常退出: {}", e);
        process::exit(1);
    }
}
