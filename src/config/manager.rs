use once_cell::sync::OnceCell;
use config::ConfigError;
use tracing::{warn, debug};
use crate::config::types::ApplicationConfig;
use crate::config::loader::{ConfigLoader, Environment};
use crate::config::validation::Validator;
use std::path::Path;

// 全局配置實例
static CONFIG: OnceCell<ApplicationConfig> = OnceCell::new();

/// 獲取應用程序配置實例
///
/// 尚未初始化時嘗試從環境加載，加載失敗則使用預設配置。
pub fn get_config() -> &'static ApplicationConfig {
    CONFIG.get_or_init(|| match ApplicationConfig::load_from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!("Failed to load configuration, using defaults: {}", err);
            ApplicationConfig::default()
        }
    })
}

/// 初始化配置（在應用程序啟動時調用）
pub fn init_config() -> Result<&'static ApplicationConfig, ConfigError> {
    let app_config = ApplicationConfig::load_from_env()?;

    if CONFIG.set(app_config).is_err() {
        warn!("Configuration already initialised, skipping");
    } else {
        debug!("Configuration initialised for {:?}", Environment::from_env());
    }

    Ok(get_config())
}

/// ApplicationConfig 加載方法實現
impl ApplicationConfig {
    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env = Environment::from_env();
        debug!("Loading configuration for {:?}", env);
        Self::load(env)
    }

    /// 從指定環境加載配置
    pub fn load(env: Environment) -> Result<Self, ConfigError> {
        Self::from_config(ConfigLoader::load(env)?)
    }

    /// 從指定目錄加載配置
    pub fn load_from(config_dir: &Path, env: Environment) -> Result<Self, ConfigError> {
        Self::from_config(ConfigLoader::load_from(config_dir, env)?)
    }

    fn from_config(source: config::Config) -> Result<Self, ConfigError> {
        let app_config: ApplicationConfig = source.try_deserialize()?;

        // 驗證失敗視為配置錯誤
        app_config
            .validate()
            .map_err(|err| ConfigError::Message(err.to_string()))?;
        debug!("Configuration validated");

        Ok(app_config)
    }
}
