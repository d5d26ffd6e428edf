// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置
//!
//! 从 TOML 文件读取运行参数。除 `port` 外的键都有默认值，可以省略。

use std::{fs::File, io::prelude::*, path::PathBuf};

use log::{info, warn};
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// 静态文件根目录，省略时不启用 `/static/` 路由
    #[serde(default)]
    document_root: Option<String>,
    /// 模板目录，省略时不配置模板引擎
    #[serde(default)]
    template_dir: Option<String>,
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    /// 阻塞线程池大小，0 表示使用 CPU 核数
    #[serde(default)]
    worker_threads: usize,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_max_body_size")]
    max_body_size: usize,
    #[serde(default = "default_compression")]
    compression: bool,
}

fn default_local() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1048576 // 1MB
}

fn default_compression() -> bool {
    true
}

impl Config {
    pub fn new() -> Self {
        Self {
            document_root: None,
            template_dir: None,
            port: 9000,
            local: default_local(),
            worker_threads: num_cpus::get(),
            debug: false,
            max_body_size: default_max_body_size(),
            compression: default_compression(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename).map_err(|e| {
            Exception::Configuration(format!("cannot open config file {}: {}", filename, e))
        })?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(|e| {
            Exception::Configuration(format!("cannot read config file {}: {}", filename, e))
        })?;
        let config = Self::from_toml_str(&str_val)?;
        info!("配置文件{}已载入", filename);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Exception> {
        let mut raw_config: Config = toml::from_str(content)
            .map_err(|e| Exception::Configuration(format!("invalid config: {}", e)))?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.max_body_size == 0 {
            warn!("max_body_size被设置为0，所有带请求体的请求都会被拒绝");
        }
        Ok(raw_config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn document_root(&self) -> Option<PathBuf> {
        self.document_root.as_ref().map(PathBuf::from)
    }

    pub fn template_dir(&self) -> Option<PathBuf> {
        self.template_dir.as_ref().map(PathBuf::from)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn compression(&self) -> bool {
        self.compression
    }
}
