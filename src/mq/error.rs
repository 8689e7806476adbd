use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// 消息核心通用錯誤類型
#[derive(Error, Debug)]
pub enum MqError {
    #[error("Lapin error: {0}")]
    Lapin(#[from] LapinError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerdeError),

    #[error("Frame encode error: {0}")]
    FrameEncode(#[from] bincode::error::EncodeError),

    #[error("Frame decode error: {0}")]
    FrameDecode(#[from] bincode::error::DecodeError),

    #[error("Dial {url} failed: {reason}")]
    Dial { url: String, reason: String },

    #[error("Broker setup failed at {stage}: {reason}")]
    Setup { stage: &'static str, reason: String },

    #[error("Broker did not become ready: {0}")]
    StartupFailed(String),

    #[error("Publish failed after {attempts} attempts: {reason}")]
    PublishFailed { attempts: usize, reason: String },

    #[error("Request {0} was not acknowledged in time")]
    RequestTimeout(String),

    #[error("Request cancelled: context done")]
    Cancelled,

    #[error("Connection closed: context done")]
    ConnectionClosed,

    #[error("{0} deadline exceeded: context done")]
    DeadlineExceeded(&'static str),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("Missing message property: {0}")]
    MissingProperty(&'static str),

    #[error("No handler registered for function: {0}")]
    NoHandler(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// 消息核心結果類型別名
pub type MqResult<T> = Result<T, MqError>;

impl MqError {
    /// 是否為傳輸層錯誤（撥號、通道、宣告等），此類錯誤一律重試
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MqError::Lapin(_) | MqError::Dial { .. } | MqError::Setup { .. }
        )
    }
}

impl From<String> for MqError {
    fn from(error: String) -> Self {
        MqError::Other(error)
    }
}

impl From<&str> for MqError {
    fn from(error: &str) -> Self {
        MqError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let dial = MqError::Dial {
            url: "amqp://localhost".into(),
            reason: "refused".into(),
        };
        assert!(dial.is_transport());
        assert!(!MqError::Cancelled.is_transport());
        assert!(!MqError::Remote("boom".into()).is_transport());
    }

    #[test]
    fn test_closed_errors_mention_context_done() {
        assert!(MqError::ConnectionClosed.to_string().contains("context done"));
        assert!(MqError::DeadlineExceeded("read").to_string().contains("context done"));
    }
}
