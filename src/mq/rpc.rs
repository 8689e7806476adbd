// RPC 模組
//
// 請求發布到 `rpc.<function>.<node>`，服務端的所有回覆（確認、回應、錯誤）
// 都發布到 `rpc-response.<client id>`，以相關ID配對。

pub mod client;
pub mod server;

pub use client::{RpcClient, RpcClientConfig};
pub use server::{RpcHandler, RpcServer, RpcServerConfig};

use crate::mq::error::{MqError, MqResult};
use sha1::{Digest, Sha1};

/// 共用的 RPC 直連交換機
pub const DEFAULT_RPC_EXCHANGE: &str = "palm-rpc";

const REQUEST_PREFIX: &str = "rpc";
const RESPONSE_PREFIX: &str = "rpc-response";

/// 請求路由鍵
pub fn request_routing_key(function: &str, node: &str) -> String {
    format!("{}.{}.{}", REQUEST_PREFIX, function, node)
}

/// 回覆路由鍵
pub fn response_routing_key(app_id: &str) -> String {
    format!("{}.{}", RESPONSE_PREFIX, app_id)
}

/// RPC 客戶端回覆佇列
pub fn client_queue(id: &str) -> String {
    format!("rpc-client-queue-{}", id)
}

/// 節點服務佇列，同一節點同一組函數共用一個佇列
pub fn server_queue(node: &str, functions: &[String]) -> String {
    let mut names: Vec<&str> = functions.iter().map(String::as_str).collect();
    names.sort_unstable();
    let digest = Sha1::digest(names.join(",").as_bytes());
    format!("node-queue.{}.{}", node, hex::encode(digest))
}

/// 解析請求路由鍵，返回 (函數, 節點)
pub fn parse_request_routing_key(routing_key: &str) -> MqResult<(String, String)> {
    let parts: Vec<&str> = routing_key.split('.').collect();
    match parts.as_slice() {
        [prefix, function, node]
            if *prefix == REQUEST_PREFIX && !function.is_empty() && !node.is_empty() =>
        {
            Ok((function.to_string(), node.to_string()))
        }
        _ => Err(MqError::InvalidRoutingKey(routing_key.to_string())),
    }
}
