pub mod models;
pub mod validation;

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};
pub use models::{
    BeatConfig, DatabaseConfig, ExecutorConfig, LockStoreConfig, ObservabilityConfig,
};
pub use validation::ConfigValidator;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub lock_store: LockStoreConfig,
    pub beat: BeatConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀: CRONBEAT）
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(SchedulerError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
        } else {
            let default_paths = [
                "config/cronbeat.toml",
                "cronbeat.toml",
                "/etc/cronbeat/config.toml",
            ];

            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let raw = builder
            .add_source(Environment::with_prefix("CRONBEAT").separator("__"))
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("构建配置失败: {e}")))?;

        let app: AppConfig = raw
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("解析配置失败: {e}")))?;

        app.validate()?;
        Ok(app)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.database.validate()?;
        self.executor.validate()?;
        self.lock_store.validate()?;
        self.beat.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}
