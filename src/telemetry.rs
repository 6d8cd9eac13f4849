use tracing_subscriber::EnvFilter;

/// 初始化日志：默认 info 级别，可以用 `RUST_LOG` 覆盖
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // 测试里可能被初始化多次，忽略重复初始化的错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
