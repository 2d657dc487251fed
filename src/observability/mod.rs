//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=taskloop=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；重复调用时保留已有订阅器
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
