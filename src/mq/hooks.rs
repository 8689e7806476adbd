// 代理生命週期鉤子
//
// 每個階段是一個有序的鉤子列表，按註冊順序執行。設置階段遇到第一個錯誤即中止，
// 退出階段則一律全部執行。

use crate::mq::error::{MqError, MqResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use lapin::{
    options::{
        ExchangeBindOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        QueueDeleteOptions,
    },
    types::FieldTable,
    Channel, Connection, ExchangeKind,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// 作用於通道的鉤子
#[async_trait]
pub trait ChannelHook: Send + Sync {
    async fn apply(&self, channel: &Channel) -> MqResult<()>;
}

/// 作用於連接的鉤子
#[async_trait]
pub trait ConnectionHook: Send + Sync {
    async fn apply(&self, connection: &Connection) -> MqResult<()>;
}

/// 宣告交換機
#[derive(Clone, Debug)]
pub struct DeclareExchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl DeclareExchange {
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
            auto_delete: false,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::Topic,
            ..Self::direct(name)
        }
    }
}

#[async_trait]
impl ChannelHook for DeclareExchange {
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        debug!("Declaring exchange: {}", self.name);
        channel
            .exchange_declare(
                &self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    durable: self.durable,
                    auto_delete: self.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// 宣告佇列
#[derive(Clone, Debug)]
pub struct DeclareQueue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl DeclareQueue {
    /// 專屬且自動刪除的佇列，隨連接消失
    pub fn exclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

#[async_trait]
impl ChannelHook for DeclareQueue {
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        debug!("Declaring queue: {}", self.name);
        channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    durable: self.durable,
                    exclusive: self.exclusive,
                    auto_delete: self.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// 綁定佇列到交換機
#[derive(Clone, Debug)]
pub struct BindQueue {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl BindQueue {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl ChannelHook for BindQueue {
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        debug!(
            "Binding queue {} to exchange {} with routing key {}",
            self.queue, self.exchange, self.routing_key
        );
        channel
            .queue_bind(
                &self.queue,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// 綁定交換機到交換機
#[derive(Clone, Debug)]
pub struct BindExchange {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
}

#[async_trait]
impl ChannelHook for BindExchange {
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        debug!(
            "Binding exchange {} to exchange {} with routing key {}",
            self.destination, self.source, self.routing_key
        );
        channel
            .exchange_bind(
                &self.destination,
                &self.source,
                &self.routing_key,
                ExchangeBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// 刪除佇列，一般註冊在通道退出前
#[derive(Clone, Debug)]
pub struct DeleteQueue {
    pub name: String,
}

#[async_trait]
impl ChannelHook for DeleteQueue {
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        debug!("Deleting queue: {}", self.name);
        channel
            .queue_delete(&self.name, QueueDeleteOptions::default())
            .await?;
        Ok(())
    }
}

/// 以閉包實現的通道鉤子
pub struct FnChannelHook<F>(pub F);

#[async_trait]
impl<F> ChannelHook for FnChannelHook<F>
where
    F: Fn(Channel) -> BoxFuture<'static, MqResult<()>> + Send + Sync,
{
    async fn apply(&self, channel: &Channel) -> MqResult<()> {
        (self.0)(channel.clone()).await
    }
}

/// 代理各生命週期階段的鉤子列表
#[derive(Clone, Default)]
pub struct BrokerHooks {
    pub exchange_declare: Vec<Arc<dyn ChannelHook>>,
    pub exchange_bind: Vec<Arc<dyn ChannelHook>>,
    pub queue_declare: Vec<Arc<dyn ChannelHook>>,
    pub queue_bind: Vec<Arc<dyn ChannelHook>>,
    pub after_created: Vec<Arc<dyn ChannelHook>>,
    pub before_channel_exit: Vec<Arc<dyn ChannelHook>>,
    pub before_connection_exit: Vec<Arc<dyn ConnectionHook>>,
}

impl BrokerHooks {
    /// 合併另一組鉤子，保持各自的註冊順序
    pub fn extend(&mut self, other: BrokerHooks) {
        self.exchange_declare.extend(other.exchange_declare);
        self.exchange_bind.extend(other.exchange_bind);
        self.queue_declare.extend(other.queue_declare);
        self.queue_bind.extend(other.queue_bind);
        self.after_created.extend(other.after_created);
        self.before_channel_exit.extend(other.before_channel_exit);
        self.before_connection_exit.extend(other.before_connection_exit);
    }

    /// 執行設置階段：交換機宣告 → 佇列宣告 → 佇列綁定 → 交換機綁定 → 創建後
    pub async fn run_setup(&self, channel: &Channel) -> MqResult<()> {
        run_stage("exchange-declare", &self.exchange_declare, channel).await?;
        run_stage("queue-declare", &self.queue_declare, channel).await?;
        run_stage("queue-bind", &self.queue_bind, channel).await?;
        run_stage("exchange-bind", &self.exchange_bind, channel).await?;
        run_stage("after-created", &self.after_created, channel).await
    }

    /// 執行通道退出前的鉤子，錯誤只記錄不中止
    pub async fn run_channel_exit(&self, channel: &Channel) {
        for hook in &self.before_channel_exit {
            if let Err(err) = hook.apply(channel).await {
                warn!("before-channel-exit hook failed: {}", err);
            }
        }
    }

    /// 執行連接退出前的鉤子，錯誤只記錄不中止
    pub async fn run_connection_exit(&self, connection: &Connection) {
        for hook in &self.before_connection_exit {
            if let Err(err) = hook.apply(connection).await {
                warn!("before-connection-exit hook failed: {}", err);
            }
        }
    }
}

async fn run_stage(
    stage: &'static str,
    hooks: &[Arc<dyn ChannelHook>],
    channel: &Channel,
) -> MqResult<()> {
    for hook in hooks {
        hook.apply(channel).await.map_err(|err| MqError::Setup {
            stage,
            reason: err.to_string(),
        })?;
    }
    Ok(())
}
