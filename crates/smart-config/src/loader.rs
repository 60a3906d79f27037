use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::SmartConfig;

pub const DEFAULT_ENV_PREFIX: &str = "SMART";

/// 配置加载器
///
/// TOML 文件之上叠加环境变量，如 `SMART_MASTER__LISTEN=0.0.0.0:7042`。
/// `agent.masters` 在环境变量中用逗号分隔。
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// 配置文件不存在时使用默认值
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    pub fn load(&self) -> Result<SmartConfig> {
        let mut builder = Config::builder();

        if let Some(path) = self.path.as_ref().filter(|p| p.exists()) {
            builder = builder.add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("agent.masters")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogFormat;
    use smart_agent::BackoffPolicy;
    use smart_types::DispatchPolicy;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_file(temp_dir.path().join("smart.toml"))
            .with_env_prefix("SMART_TEST_MISSING")
            .load()
            .unwrap();

        assert_eq!(config.master.heartbeat_timeout_ms, 15_000);
        assert_eq!(config.access_count.failover, "save_failed_with_retry");
        assert_eq!(config.partition.retention_count, 6);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("smart.toml");
        let content = r#"
[master]
listen = "0.0.0.0:9042"
dispatch_policy = "node"
max_cmdlets_per_agent = 4

[metastore]
url = "sqlite://smart.db?mode=rwc"

[agent]
masters = ["m1:9042", "m2:9042"]
backoff = "exponential"

[logging]
level = "debug"
format = "json"

[metrics]
listen = "0.0.0.0:9100"
"#;
        fs::write(&path, content).unwrap();

        let config = ConfigLoader::new()
            .with_file(&path)
            .with_env_prefix("SMART_TEST_FILE")
            .load()
            .unwrap();

        assert_eq!(config.master.listen, "0.0.0.0:9042");
        assert_eq!(config.master.dispatch_policy, DispatchPolicy::Node);
        assert_eq!(config.master.max_cmdlets_per_agent, 4);
        // 未配置的字段保持默认
        assert_eq!(config.master.schedule_interval_ms, 50);
        assert_eq!(config.metastore.url, "sqlite://smart.db?mode=rwc");
        assert_eq!(config.agent.masters, vec!["m1:9042", "m2:9042"]);
        assert_eq!(config.agent.backoff, BackoffPolicy::Exponential);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.metrics.listen.as_deref(), Some("0.0.0.0:9100"));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("smart.toml");
        fs::write(&path, "[master]\nlisten = \"0.0.0.0:9042\"\n").unwrap();

        std::env::set_var("SMART_TEST_ENV_MASTER__LISTEN", "10.0.0.1:7042");
        std::env::set_var("SMART_TEST_ENV_MASTER__MAX_PENDING_CMDLETS", "20");
        std::env::set_var("SMART_TEST_ENV_AGENT__MASTERS", "a:1,b:2");

        let config = ConfigLoader::new()
            .with_file(&path)
            .with_env_prefix("SMART_TEST_ENV")
            .load()
            .unwrap();

        assert_eq!(config.master.listen, "10.0.0.1:7042");
        assert_eq!(config.master.max_pending_cmdlets, 20);
        assert_eq!(config.agent.masters, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("smart.toml");
        fs::write(&path, "[master]\nmax_pending_cmdlets = \"many\"\n").unwrap();

        let result = ConfigLoader::new()
            .with_file(&path)
            .with_env_prefix("SMART_TEST_INVALID")
            .load();
        assert!(result.is_err());
    }
}
