//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化结构化日志；RUST_LOG 覆盖默认 info 级别
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();
}
