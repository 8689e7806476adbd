use async_trait::async_trait;
use chrono::Utc;
use lapin::message::Delivery;
use lapin::types::ShortString;
use lapin::BasicProperties;
use std::fmt;

/// 消息類型（對應 AMQP `type` 屬性）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// RPC 請求
    Request,
    /// 取消進行中的 RPC 請求
    Cancel,
    /// RPC 成功回應
    Response,
    /// RPC 錯誤回應
    Error,
    /// 服務端確認已收到請求
    RequestReceived,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Cancel => "cancel",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
            MessageKind::RequestReceived => "req-recv",
        }
    }

    /// 解析類型字串，未知類型返回 None
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(MessageKind::Request),
            "cancel" => Some(MessageKind::Cancel),
            "response" => Some(MessageKind::Response),
            "error" => Some(MessageKind::Error),
            "req-recv" => Some(MessageKind::RequestReceived),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息封裝，承載核心使用到的 AMQP 屬性與載荷
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// 相關ID (用於請求-回應配對)
    pub correlation_id: Option<String>,
    /// 消息類型原始字串
    pub kind: Option<String>,
    /// 發送方身份
    pub app_id: Option<String>,
    /// 回覆路由鍵
    pub reply_to: Option<String>,
    /// 發送時間 (Unix 秒)
    pub timestamp: Option<u64>,
    pub content_type: Option<String>,
    /// 消息載荷
    pub body: Vec<u8>,
}

impl Message {
    /// 創建新消息，時間戳設為當前時間
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            timestamp: Some(Utc::now().timestamp().max(0) as u64),
            body,
            ..Self::default()
        }
    }

    /// 創建 JSON 載荷的消息
    pub fn json(body: Vec<u8>) -> Self {
        Self::new(body).with_content_type("application/json")
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// 解析後的消息類型
    pub fn message_kind(&self) -> Option<MessageKind> {
        self.kind.as_deref().and_then(MessageKind::parse)
    }

    /// 轉換為 AMQP 消息屬性
    pub fn properties(&self) -> BasicProperties {
        let mut properties = BasicProperties::default();
        if let Some(correlation_id) = &self.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
        }
        if let Some(kind) = &self.kind {
            properties = properties.with_kind(ShortString::from(kind.clone()));
        }
        if let Some(app_id) = &self.app_id {
            properties = properties.with_app_id(ShortString::from(app_id.clone()));
        }
        if let Some(reply_to) = &self.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to.clone()));
        }
        if let Some(timestamp) = self.timestamp {
            properties = properties.with_timestamp(timestamp);
        }
        if let Some(content_type) = &self.content_type {
            properties = properties.with_content_type(ShortString::from(content_type.clone()));
        }
        properties
    }

    /// 從 AMQP 屬性與載荷還原消息
    pub fn from_properties(properties: &BasicProperties, body: Vec<u8>) -> Self {
        fn text(value: &Option<ShortString>) -> Option<String> {
            value.as_ref().map(|s| s.as_str().to_string())
        }

        Self {
            correlation_id: text(properties.correlation_id()),
            kind: text(properties.kind()),
            app_id: text(properties.app_id()),
            reply_to: text(properties.reply_to()),
            timestamp: *properties.timestamp(),
            content_type: text(properties.content_type()),
            body,
        }
    }
}

/// 消費者收到的消息
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: Message,
}

impl IncomingMessage {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: Message,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message,
        }
    }
}

impl From<&Delivery> for IncomingMessage {
    fn from(delivery: &Delivery) -> Self {
        Self {
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            message: Message::from_properties(&delivery.properties, delivery.data.clone()),
        }
    }
}

/// 消息處理器特徵
///
/// 代理的消費任務會逐條、依序地呼叫 `handle`；需要並行處理的實作應自行派發。
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, incoming: IncomingMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        for kind in [
            MessageKind::Request,
            MessageKind::Cancel,
            MessageKind::Response,
            MessageKind::Error,
            MessageKind::RequestReceived,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::RequestReceived.as_str(), "req-recv");
        assert_eq!(MessageKind::parse("heartbeat"), None);
    }

    #[test]
    fn test_properties_carry_rpc_fields() {
        let message = Message::json(b"{}".to_vec())
            .with_kind(MessageKind::Request)
            .with_correlation_id("c-1")
            .with_app_id("client-a")
            .with_reply_to("rpc-response.client-a");

        let properties = message.properties();
        assert_eq!(properties.kind().as_ref().map(|k| k.as_str()), Some("request"));
        assert_eq!(
            properties.correlation_id().as_ref().map(|c| c.as_str()),
            Some("c-1")
        );

        let restored = Message::from_properties(&properties, message.body.clone());
        assert_eq!(restored, message);
        assert_eq!(restored.message_kind(), Some(MessageKind::Request));
    }
}
