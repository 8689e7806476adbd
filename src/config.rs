//! 配置管理模組
//!
//! 從 `config/<環境>.toml` 加載配置，再以 `PALM__<區段>__<鍵>` 環境變數覆蓋。
//! 環境由 `PALM_ENV` 選擇，目錄由 `CONFIG_DIR` 指定。

// 宣告子模組
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

// 重新導出常用組件
pub use loader::{ConfigExt, ConfigLoader, Environment};
pub use manager::{get_config, init_config};
pub use types::*;
pub use validation::{validate_config, ValidationError, ValidationUtils, Validator};

#[cfg(test)]
mod tests {
    #[test]
    fn test_module_exports() {
        let _ = super::Environment::Development;
        let _ = super::ValidationUtils::not_empty("test", "field");

        fn _ensure_config_works(cfg: &super::ApplicationConfig) {
            let _ = &cfg.log;
            let _ = &cfg.broker;
            let _ = &cfg.publisher;
            let _ = &cfg.rpc;
            let _ = &cfg.stream;
        }
    }
}
