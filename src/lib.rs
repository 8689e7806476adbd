// 模組定義
pub mod config;
pub mod monitor;
pub mod mq;
