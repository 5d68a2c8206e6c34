//! `stomp_ws_utils` 提供基于 WebSocket 承载 STOMP 1.2 帧的通信工具。
//!
//! 主要模块：
//! - `message`: STOMP 帧 (`StompFrame`) 的编码、解码与心跳协商。
//! - `error`: 库内统一错误类型 `WsError`。
//! - `client`: 客户端传输层，负责连接推送端并收发帧。
//! - `server`: 服务端传输层，用于在本地模拟推送端 (测试与演示)。

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::{StompCommand, StompFrame, WireEvent};
