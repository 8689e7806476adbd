// monitor/logger.rs - 日誌系統初始化

use crate::config::LogConfig;
use crate::monitor::{MonitorError, MonitorResult};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// 日誌輸出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 人類可讀的多行格式
    Pretty,
    /// 每行一個 JSON 物件
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> MonitorResult<Self> {
        match value.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(MonitorError::LoggerError(format!("unknown log format: {}", other))),
        }
    }
}

/// 將配置中的日誌級別轉換為 tracing 級別，無法識別時為 INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// 構建過濾器：優先使用 `RUST_LOG`，否則使用配置的級別
fn build_filter(log_config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(&log_config.level).as_str().to_lowercase()))
}

/// 安裝全局日誌訂閱者
///
/// 重複初始化返回錯誤而不是 panic。
pub fn init_logging(log_config: &LogConfig) -> MonitorResult<()> {
    let format = LogFormat::parse(&log_config.format)?;
    let filter = build_filter(log_config);

    let result = match format {
        LogFormat::Pretty => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    result.map_err(|e| MonitorError::InitializationError(format!("設置日誌系統失敗: {}", e)))?;

    info!("Logging initialised (level={}, format={:?})", log_config.level, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_log_format() {
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn test_second_initialisation_is_an_error() {
        let config = LogConfig::default();
        // 其他測試可能已安裝訂閱者，第一次呼叫的結果不確定
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(MonitorError::InitializationError(_))
        ));
    }
}
