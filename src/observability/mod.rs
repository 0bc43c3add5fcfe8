//! 可观测性：tracing 订阅器初始化
//!
//! RUST_LOG 优先，未设置时使用配置中的 [logging].filter。重复初始化不会 panic（嵌入方可能已安装订阅器）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// 安装全局订阅器；已安装时返回 false
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok()
}

pub fn init_from_config(cfg: &AppConfig) -> bool {
    init(&cfg.logging.filter)
}
