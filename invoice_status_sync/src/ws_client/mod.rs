// invoice_status_sync/src/ws_client/mod.rs

//! 推送连接的客户端实现。
//!
//! - `link`: 传输接缝 `Connector` 及其 WebSocket 实现。
//! - `handshake`: STOMP 握手与心跳协商。
//! - `reconnect`: 线性退避重连策略。
//! - `service`: 连接管理器 `ConnectionManager`，负责连接生命周期、订阅入口与后台重连。

pub mod handshake;
pub mod link;
pub mod reconnect;
pub mod service;

pub use link::{Connector, FrameLink, WebSocketConnector};
pub use reconnect::ReconnectPolicy;
pub use service::{ConnectionManager, ManagerOptions};
