// mq.rs - AMQP 消息核心
//
// 代理負責連接生命週期與消費者，發布者負責帶重試的發布，
// 在此之上建立位元組流 (stream) 與請求-回應 (rpc) 兩種抽象。

pub mod broker;
pub mod error;
pub mod hooks;
pub mod message;
pub mod publisher;
pub mod rpc;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{Broker, BrokerBuilder, BrokerConfig, ConsumingParam, Dialer, Registration};
pub use error::{MqError, MqResult};
pub use hooks::{BrokerHooks, ChannelHook, ConnectionHook};
pub use message::{DeliveryHandler, IncomingMessage, Message, MessageKind};
pub use publisher::{MessagePublisher, Publisher, PublisherConfig};
pub use rpc::{RpcClient, RpcClientConfig, RpcHandler, RpcServer, RpcServerConfig};
pub use stream::{Connection, ConnectionFrame, Listener, StreamConfig};
