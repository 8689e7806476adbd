use crate::config::RpcSection;
use crate::mq::broker::{Broker, ConsumingParam};
use crate::mq::error::{MqError, MqResult};
use crate::mq::hooks::{BindQueue, BrokerHooks, DeclareExchange, DeclareQueue};
use crate::mq::message::{DeliveryHandler, IncomingMessage, Message, MessageKind};
use crate::mq::publisher::{MessagePublisher, Publisher, PublisherConfig};
use crate::mq::rpc::{
    parse_request_routing_key, request_routing_key, response_routing_key, server_queue,
    DEFAULT_RPC_EXCHANGE,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// RPC 函數處理器
///
/// `ctx` 在客戶端取消請求或服務關閉時被取消，長時間運行的處理器應監聽它。
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, ctx: CancellationToken, body: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// 以 JSON 編解碼請求與回應的處理器包裝
struct TypedHandler<Req, Resp, F> {
    func: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<Req, Resp, F, Fut> RpcHandler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(CancellationToken, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
{
    async fn handle(&self, ctx: CancellationToken, body: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let request: Req = serde_json::from_slice(&body)?;
        let response = (self.func)(ctx, request).await?;
        Ok(serde_json::to_vec(&response)?)
    }
}

/// RPC 服務端配置
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    pub exchange: String,
    /// 回覆發布失敗時的重試次數
    pub publish_retry: usize,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_RPC_EXCHANGE.to_string(),
            publish_retry: 3,
        }
    }
}

impl From<&RpcSection> for RpcServerConfig {
    fn from(section: &RpcSection) -> Self {
        Self {
            exchange: section.exchange.clone(),
            publish_retry: section.publish_retry as usize,
        }
    }
}

/// 處理結束時移除進行中記錄並取消請求上下文
///
/// 只移除自己插入的記錄，同一相關ID在取消後重新投遞的請求不受影響。
struct ProcessingGuard {
    processing: Arc<DashMap<String, Arc<CancellationToken>>>,
    correlation_id: String,
    token: Arc<CancellationToken>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.processing
            .remove_if(&self.correlation_id, |_, current| Arc::ptr_eq(current, &self.token));
    }
}

/// RPC 服務端
pub struct RpcServer {
    config: RpcServerConfig,
    publisher: Arc<dyn MessagePublisher>,
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    processing: Arc<DashMap<String, Arc<CancellationToken>>>,
    token: CancellationToken,
}

impl RpcServer {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        config: RpcServerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            publisher,
            handlers: RwLock::new(HashMap::new()),
            processing: Arc::new(DashMap::new()),
            token,
        }
    }

    /// 創建使用代理連線的服務端，回覆經獨立的發布者以 `publish_retry` 重試
    pub fn for_broker(broker: &Broker, config: RpcServerConfig) -> Self {
        let publisher_config = PublisherConfig {
            retry: config.publish_retry,
            ..broker.publisher().config().clone()
        };
        let publisher = Arc::new(Publisher::new(broker.dialer().clone(), publisher_config));
        Self::new(publisher, config, broker.child_token())
    }

    /// 註冊 JSON 函數
    pub fn register<Req, Resp, F, Fut>(&self, name: &str, func: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CancellationToken, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        self.register_handler(
            name,
            Arc::new(TypedHandler {
                func,
                _marker: PhantomData,
            }),
        );
    }

    /// 註冊原始處理器，同名函數會被覆蓋
    pub fn register_handler(&self, name: &str, handler: Arc<dyn RpcHandler>) {
        if self.handlers.write().insert(name.to_string(), handler).is_some() {
            warn!("RPC function {} registered twice, replacing previous handler", name);
        }
    }

    /// 已註冊的函數名稱 (已排序)
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 正在處理的請求數
    pub fn in_flight(&self) -> usize {
        self.processing.len()
    }

    /// 在代理上為節點綁定服務佇列
    ///
    /// 佇列名稱取決於當前已註冊的函數，之後註冊的函數需要重新綁定。
    pub fn bind(self: &Arc<Self>, broker: &Broker, node: &str) -> String {
        let functions = self.functions();
        let queue = server_queue(node, &functions);

        let mut hooks = BrokerHooks::default();
        hooks
            .exchange_declare
            .push(Arc::new(DeclareExchange::direct(self.config.exchange.clone())));
        hooks.queue_declare.push(Arc::new(DeclareQueue {
            name: queue.clone(),
            durable: false,
            exclusive: false,
            auto_delete: true,
        }));
        for function in &functions {
            hooks.queue_bind.push(Arc::new(BindQueue::new(
                queue.clone(),
                self.config.exchange.clone(),
                request_routing_key(function, node),
            )));
        }
        broker.configure(hooks, vec![ConsumingParam::new(queue.clone(), self.clone())]);

        info!(
            "RPC server for node {} serving {:?} on queue {}",
            node, functions, queue
        );
        queue
    }

    /// 取消所有進行中的請求
    pub fn close(&self) {
        self.token.cancel();
    }

    async fn handle_request(&self, incoming: IncomingMessage) -> MqResult<()> {
        let (function, node) = parse_request_routing_key(&incoming.routing_key)?;
        let message = incoming.message;
        let correlation_id = message
            .correlation_id
            .clone()
            .ok_or(MqError::MissingProperty("correlation_id"))?;
        let app_id = message
            .app_id
            .clone()
            .ok_or(MqError::MissingProperty("app_id"))?;
        let is_cancel = message.message_kind() == Some(MessageKind::Cancel);

        let token = match self.processing.entry(correlation_id.clone()) {
            Entry::Occupied(entry) => {
                if is_cancel {
                    let (_, token) = entry.remove_entry();
                    token.cancel();
                    info!("RPC request {} cancelled by {}", correlation_id, app_id);
                } else {
                    warn!("Repeated request {} from {}, dropped", correlation_id, app_id);
                }
                return Ok(());
            }
            Entry::Vacant(entry) => {
                if is_cancel {
                    debug!("Cancel for unknown request {}, ignored", correlation_id);
                    return Ok(());
                }
                let token = Arc::new(self.token.child_token());
                entry.insert(Arc::clone(&token));
                token
            }
        };

        let guard = ProcessingGuard {
            processing: Arc::clone(&self.processing),
            correlation_id: correlation_id.clone(),
            token: Arc::clone(&token),
        };
        let reply_key = response_routing_key(&app_id);

        let ack = Message::new(Vec::new())
            .with_kind(MessageKind::RequestReceived)
            .with_correlation_id(correlation_id.clone())
            .with_app_id(node.clone());
        self.publisher
            .publish(&self.config.exchange, &reply_key, ack)
            .await?;

        let handler = self.handlers.read().get(&function).cloned();
        let Some(handler) = handler else {
            warn!("No handler registered for RPC function {}", function);
            let reply = Message::new(format!("unknown function: {}", function).into_bytes())
                .with_kind(MessageKind::Error)
                .with_correlation_id(correlation_id)
                .with_app_id(node);
            drop(guard);
            return self
                .publisher
                .publish(&self.config.exchange, &reply_key, reply)
                .await;
        };

        debug!(
            "Processing RPC request {} for {}.{} from {}",
            correlation_id, function, node, app_id
        );

        let publisher = Arc::clone(&self.publisher);
        let exchange = self.config.exchange.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let ctx = CancellationToken::clone(&token);
            let outcome = AssertUnwindSafe(handler.handle(ctx, message.body))
                .catch_unwind()
                .await;

            let reply = match outcome {
                Ok(Ok(body)) => Message::json(body).with_kind(MessageKind::Response),
                Ok(Err(err)) => {
                    debug!("RPC function {} returned error: {}", function, err);
                    Message::new(err.to_string().into_bytes()).with_kind(MessageKind::Error)
                }
                Err(_) => {
                    error!("RPC function {} panicked on request {}", function, correlation_id);
                    Message::new(b"handler panicked".to_vec()).with_kind(MessageKind::Error)
                }
            }
            .with_correlation_id(correlation_id.clone())
            .with_app_id(node);

            if let Err(err) = publisher.publish(&exchange, &reply_key, reply).await {
                error!("Failed to publish reply for RPC request {}: {}", correlation_id, err);
            }
        });

        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for RpcServer {
    async fn handle(&self, incoming: IncomingMessage) {
        let routing_key = incoming.routing_key.clone();
        if let Err(err) = self.handle_request(incoming).await {
            warn!("Dropped RPC request on {}: {}", routing_key, err);
        }
    }
}
