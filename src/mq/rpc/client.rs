use crate::config::RpcSection;
use crate::mq::broker::{Broker, ConsumingParam};
use crate::mq::error::{MqError, MqResult};
use crate::mq::hooks::{BindQueue, BrokerHooks, DeclareExchange, DeclareQueue, DeleteQueue};
use crate::mq::message::{DeliveryHandler, IncomingMessage, Message, MessageKind};
use crate::mq::publisher::MessagePublisher;
use crate::mq::rpc::{client_queue, request_routing_key, response_routing_key, DEFAULT_RPC_EXCHANGE};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// RPC 客戶端配置
#[derive(Clone, Debug)]
pub struct RpcClientConfig {
    pub exchange: String,
    /// 等待服務端確認收到請求的時間
    pub request_sent_timeout: Duration,
    /// 請求結束後保留狀態的寬限期
    pub cleanup_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_RPC_EXCHANGE.to_string(),
            request_sent_timeout: Duration::from_secs(5),
            cleanup_delay: Duration::from_secs(10),
        }
    }
}

impl From<&RpcSection> for RpcClientConfig {
    fn from(section: &RpcSection) -> Self {
        Self {
            exchange: section.exchange.clone(),
            request_sent_timeout: Duration::from_millis(section.request_sent_timeout_ms),
            cleanup_delay: Duration::from_millis(section.cleanup_delay_ms),
        }
    }
}

/// 單個進行中請求的狀態
struct PendingRequest {
    /// 服務端確認收到後取消
    acked: CancellationToken,
    /// 收到回應或錯誤後取消
    done: CancellationToken,
    sent: AtomicBool,
    outcome: parking_lot::Mutex<Option<Result<Vec<u8>, String>>>,
}

impl PendingRequest {
    fn new() -> Self {
        Self {
            acked: CancellationToken::new(),
            done: CancellationToken::new(),
            sent: AtomicBool::new(false),
            outcome: parking_lot::Mutex::new(None),
        }
    }

    fn complete(&self, outcome: Result<Vec<u8>, String>) {
        {
            let mut current = self.outcome.lock();
            if current.is_none() {
                *current = Some(outcome);
            }
        }
        self.done.cancel();
    }
}

/// RPC 客戶端
pub struct RpcClient {
    id: String,
    config: RpcClientConfig,
    publisher: Arc<dyn MessagePublisher>,
    requests: Arc<DashMap<String, Arc<PendingRequest>>>,
}

impl RpcClient {
    /// 創建新的 RPC 客戶端，回覆需經 [`DeliveryHandler`] 送入
    pub fn new(
        id: impl Into<String>,
        publisher: Arc<dyn MessagePublisher>,
        config: RpcClientConfig,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            publisher,
            requests: Arc::new(DashMap::new()),
        }
    }

    /// 在代理上註冊回覆佇列並創建客戶端
    pub fn bind(broker: &Broker, id: &str, config: RpcClientConfig) -> Arc<Self> {
        let client = Arc::new(Self::new(id, broker.publisher(), config));

        let queue = client_queue(id);
        let mut hooks = BrokerHooks::default();
        hooks
            .exchange_declare
            .push(Arc::new(DeclareExchange::direct(client.config.exchange.clone())));
        hooks.queue_declare.push(Arc::new(DeclareQueue::exclusive(queue.clone())));
        hooks.queue_bind.push(Arc::new(BindQueue::new(
            queue.clone(),
            client.config.exchange.clone(),
            client.response_key(),
        )));
        hooks
            .before_channel_exit
            .push(Arc::new(DeleteQueue { name: queue.clone() }));
        broker.configure(hooks, vec![ConsumingParam::new(queue, client.clone())]);

        info!("RPC client {} bound on exchange {}", id, client.config.exchange);
        client
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 本客戶端接收回覆的路由鍵
    pub fn response_key(&self) -> String {
        response_routing_key(&self.id)
    }

    /// 尚未清理的請求數
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// 呼叫遠端函數，請求與回應均為 JSON
    pub async fn call<Req, Resp>(
        &self,
        ctx: &CancellationToken,
        function: &str,
        node: &str,
        request: &Req,
    ) -> MqResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;
        let response = self.call_raw(ctx, function, node, body).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    /// 呼叫遠端函數
    ///
    /// 在 `request_sent_timeout` 內沒有收到確認（或回應）即返回超時；確認後只受 `ctx` 限制。
    /// `ctx` 被取消或本 future 被丟棄時向服務端發送取消消息。
    pub async fn call_raw(
        &self,
        ctx: &CancellationToken,
        function: &str,
        node: &str,
        body: Vec<u8>,
    ) -> MqResult<Vec<u8>> {
        let correlation_id = Uuid::new_v4().to_string();
        let routing_key = request_routing_key(function, node);
        let state = Arc::new(PendingRequest::new());
        self.requests.insert(correlation_id.clone(), Arc::clone(&state));

        let request_token = ctx.child_token();
        let _request_guard = request_token.clone().drop_guard();
        self.watch_request(
            correlation_id.clone(),
            routing_key.clone(),
            request_token.clone(),
            Arc::clone(&state),
        );

        let message = Message::json(body)
            .with_kind(MessageKind::Request)
            .with_correlation_id(correlation_id.clone())
            .with_app_id(self.id.clone())
            .with_reply_to(self.response_key());

        debug!(
            "Sending RPC request to routing_key: {}, correlation_id: {}",
            routing_key, correlation_id
        );
        self.publisher
            .publish(&self.config.exchange, &routing_key, message)
            .await?;
        state.sent.store(true, Ordering::SeqCst);

        // 呼叫方取消優先於同時到達的回覆
        tokio::select! {
            biased;
            _ = request_token.cancelled() => return Err(MqError::Cancelled),
            _ = state.acked.cancelled() => {}
            _ = state.done.cancelled() => {}
            _ = tokio::time::sleep(self.config.request_sent_timeout) => {
                warn!(
                    "RPC request {} to {} not acknowledged within {:?}",
                    correlation_id, routing_key, self.config.request_sent_timeout
                );
                return Err(MqError::RequestTimeout(correlation_id));
            }
        }

        tokio::select! {
            biased;
            _ = request_token.cancelled() => return Err(MqError::Cancelled),
            _ = state.done.cancelled() => {}
        }
        if request_token.is_cancelled() {
            return Err(MqError::Cancelled);
        }

        let outcome = state.outcome.lock().take();
        match outcome {
            Some(Ok(response)) => {
                debug!("Received RPC response for correlation_id: {}", correlation_id);
                Ok(response)
            }
            Some(Err(reason)) => Err(MqError::Remote(reason)),
            None => Err(MqError::Other(format!(
                "response for {} already consumed",
                correlation_id
            ))),
        }
    }

    /// 請求結束（完成、取消、超時）後：必要時通知服務端取消，寬限期後清理狀態
    fn watch_request(
        &self,
        correlation_id: String,
        routing_key: String,
        token: CancellationToken,
        state: Arc<PendingRequest>,
    ) {
        let publisher = Arc::clone(&self.publisher);
        let requests = Arc::clone(&self.requests);
        let exchange = self.config.exchange.clone();
        let cleanup_delay = self.config.cleanup_delay;
        let app_id = self.id.clone();
        let reply_to = self.response_key();

        tokio::spawn(async move {
            token.cancelled().await;

            if state.sent.load(Ordering::SeqCst) && !state.done.is_cancelled() {
                debug!("Cancelling RPC request {} on {}", correlation_id, routing_key);
                let cancel = Message::new(Vec::new())
                    .with_kind(MessageKind::Cancel)
                    .with_correlation_id(correlation_id.clone())
                    .with_app_id(app_id)
                    .with_reply_to(reply_to);
                if let Err(err) = publisher.publish(&exchange, &routing_key, cancel).await {
                    error!("Failed to send cancel for RPC request {}: {}", correlation_id, err);
                }
            }

            // 寬限期內遲到的回覆仍能找到狀態，不會被當作未知請求
            tokio::time::sleep(cleanup_delay).await;
            requests.remove(&correlation_id);
        });
    }

    fn handle_reply(&self, incoming: IncomingMessage) {
        let message = incoming.message;
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            warn!("Received RPC reply without correlation_id");
            return;
        };

        let state = match self.requests.get(correlation_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                debug!("No pending request found for correlation_id: {}", correlation_id);
                return;
            }
        };

        match message.message_kind() {
            Some(MessageKind::RequestReceived) => {
                debug!("RPC request {} acknowledged", correlation_id);
                state.acked.cancel();
            }
            Some(MessageKind::Response) => state.complete(Ok(message.body)),
            Some(MessageKind::Error) => {
                state.complete(Err(String::from_utf8_lossy(&message.body).into_owned()))
            }
            _ => warn!(
                "Unexpected reply type {:?} for correlation_id: {}",
                message.kind, correlation_id
            ),
        }
    }
}

#[async_trait]
impl DeliveryHandler for RpcClient {
    async fn handle(&self, incoming: IncomingMessage) {
        self.handle_reply(incoming);
    }
}
