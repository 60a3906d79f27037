use anyhow::anyhow;
use smart_config::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

/// 初始化 tracing，`RUST_LOG` 优先于配置中的级别
pub fn init_tracing(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

