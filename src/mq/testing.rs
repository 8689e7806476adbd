// 測試用記憶體消息匯流排
//
// 按 (交換機, 路由鍵) 精確匹配綁定；每個綁定有自己的消費任務，逐條呼叫處理器，
// 因此同一綁定內保持發布順序。無法路由的消息直接丟棄。

use crate::mq::broker::dispatch;
use crate::mq::error::MqResult;
use crate::mq::message::{DeliveryHandler, IncomingMessage, Message};
use crate::mq::publisher::MessagePublisher;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct MemoryBus {
    bindings: DashMap<(String, String), Vec<mpsc::UnboundedSender<IncomingMessage>>>,
    published: Mutex<Vec<(String, String, Message)>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, exchange: &str, routing_key: &str, handler: Arc<dyn DeliveryHandler>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncomingMessage>();
        let queue = format!("{}/{}", exchange, routing_key);
        tokio::spawn(async move {
            while let Some(incoming) = rx.recv().await {
                dispatch(handler.as_ref(), incoming, &queue).await;
            }
        });
        self.bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default()
            .push(tx);
    }

    /// 所有發布到指定路由鍵的消息
    pub fn published_to(&self, routing_key: &str) -> Vec<Message> {
        self.published
            .lock()
            .iter()
            .filter(|(_, key, _)| key == routing_key)
            .map(|(_, _, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for MemoryBus {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> MqResult<()> {
        self.published
            .lock()
            .push((exchange.to_string(), routing_key.to_string(), message.clone()));

        if let Some(senders) = self
            .bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
        {
            for sender in senders.iter() {
                let _ = sender.send(IncomingMessage::new(exchange, routing_key, message.clone()));
            }
        }
        Ok(())
    }
}
