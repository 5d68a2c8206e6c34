//! `invoice_status_sync` 发票核验状态实时同步引擎。
//!
//! 通过一条持久的 WebSocket (STOMP) 连接，把发票提交到外部核验机构后的异步结果
//! 实时推送给使用方。
//!
//! 主要模块：
//! - `address`: 推送端点解析 (按宿主安全上下文升级协议)。
//! - `config`: 配置文件加载与环境变量覆盖。
//! - `ws_client`: 连接管理器、握手、心跳与线性退避重连。
//! - `registry`: 主题到回调的订阅注册表。
//! - `dispatcher`: 入站帧解码与分发。
//! - `notifier`: 面向单个关注对象的状态通知器。
//! - `terminal`: 终态通知去重。
//! - `error` / `state`: 错误类型与连接状态。

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod state;
pub mod terminal;
pub mod ws_client;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::SyncError;
pub use notifier::{StaticToken, StatusStateNotifier, TokenSource};
pub use registry::StatusCallback;
pub use state::ConnectionState;
pub use terminal::TerminalStatusTracker;
pub use ws_client::{ConnectionManager, ManagerOptions};

pub use status_models::{StatusCode, StatusMessage, Topic};
