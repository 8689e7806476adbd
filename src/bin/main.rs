use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use lapin::{options::BasicQosOptions, Channel};
use palm_mq::config::{self, ApplicationConfig};
use palm_mq::monitor::init_logging;
use palm_mq::mq::hooks::FnChannelHook;
use palm_mq::mq::{
    Broker, BrokerBuilder, MqResult, RpcClient, RpcClientConfig, RpcServer, RpcServerConfig,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "palm-node", about = "palm 消息節點工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以指定節點身份提供內建的 RPC 函數 (echo, ping)
    Serve {
        /// 節點ID
        #[arg(short, long)]
        node: String,
    },
    /// 執行一次 RPC 呼叫並輸出回應
    Call {
        /// 函數名稱
        function: String,
        /// 目標節點ID
        node: String,
        /// JSON 請求內容
        #[arg(default_value = "null")]
        payload: String,
    },
}

/// 服務節點每個消費者未確認消息的上限
const SERVE_PREFETCH: u16 = 32;

#[derive(Serialize)]
struct Pong {
    node: String,
    timestamp: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化配置
    let app_config = config::init_config()?;

    // 初始化日誌系統
    init_logging(&app_config.log)?;

    match cli.command {
        Commands::Serve { node } => serve(app_config, node).await,
        Commands::Call {
            function,
            node,
            payload,
        } => call(app_config, &function, &node, &payload).await,
    }
}

async fn start_broker(broker: &Arc<Broker>) -> Result<()> {
    broker
        .run_background()
        .await
        .with_context(|| format!("無法連接消息代理 {}", broker.dialer().redacted_url()))
}

async fn serve(app_config: &ApplicationConfig, node: String) -> Result<()> {
    let broker = BrokerBuilder::from_config(app_config)
        .with_connection_name(format!("palm-node-{}", node))
        .after_created(FnChannelHook(|channel: Channel| -> BoxFuture<'static, MqResult<()>> {
            Box::pin(async move {
                channel
                    .basic_qos(SERVE_PREFETCH, BasicQosOptions::default())
                    .await?;
                Ok(())
            })
        }))
        .build();

    let server = Arc::new(RpcServer::for_broker(
        &broker,
        RpcServerConfig::from(&app_config.rpc),
    ));
    server.register("echo", |_ctx, request: serde_json::Value| async move { Ok(request) });
    let pong_node = node.clone();
    server.register("ping", move |_ctx, _request: serde_json::Value| {
        let node = pong_node.clone();
        async move {
            Ok(Pong {
                node,
                timestamp: chrono::Utc::now().timestamp(),
            })
        }
    });
    server.bind(&broker, &node);

    start_broker(&broker).await?;
    info!("Node {} ready, serving {:?}", node, server.functions());

    let result = match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, exiting...");
            Ok(())
        }
        Err(err) => {
            error!("Failed to listen for shutdown signal: {}", err);
            Err(anyhow!("無法監聽關閉信號: {}", err))
        }
    };

    server.close();
    broker.close().await;
    result
}

async fn call(
    app_config: &ApplicationConfig,
    function: &str,
    node: &str,
    payload: &str,
) -> Result<()> {
    let request: serde_json::Value =
        serde_json::from_str(payload).context("請求內容不是有效的 JSON")?;

    let client_id = format!("palm-cli-{}", Uuid::new_v4());
    let broker = BrokerBuilder::from_config(app_config)
        .with_connection_name(client_id.clone())
        .build();
    let client = RpcClient::bind(&broker, &client_id, RpcClientConfig::from(&app_config.rpc));
    start_broker(&broker).await?;

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = client
        .call::<_, serde_json::Value>(&ctx, function, node, &request)
        .await;
    broker.close().await;

    let response = result.with_context(|| format!("呼叫 {}.{} 失敗", function, node))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
