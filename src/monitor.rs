// monitor.rs - 監控系統模組

pub mod logger;

pub use logger::{init_logging, parse_level, LogFormat};

/// 監控系統錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// 日誌記錄錯誤
    #[error("Logger error: {0}")]
    LoggerError(String),

    /// 初始化錯誤
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// 監控結果類型
pub type MonitorResult<T> = Result<T, MonitorError>;
