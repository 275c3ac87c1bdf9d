//! 可观测性
//!
//! tracing 初始化：默认 info，可通过 RUST_LOG 覆盖。重复初始化（如测试中）安全忽略。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .try_init();
}
