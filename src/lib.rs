// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod app;
pub mod config;
pub mod context;
pub mod exception;
pub mod gateway;
pub mod interceptor;
pub mod param;
pub mod registry;
pub mod request;
pub mod response;
pub mod route;
pub mod signal;
pub mod template;
pub mod util;

pub use app::{Application, Dispatcher, Module};
pub use config::Config;
pub use exception::Exception;
pub use interceptor::{Interceptor, Next};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::{Environ, Request};
pub use response::{Body, CookieOptions, Expires, Response};
pub use route::{plain, with_params, Params, Reply, Route};
pub use template::{view, DirectoryTemplateEngine, Template, TemplateEngine};
pub use util::HtmlBuilder;
