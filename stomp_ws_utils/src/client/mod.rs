// stomp_ws_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! `transport` 子模块负责连接推送端、收发 STOMP 帧，并把底层
//! `tokio-tungstenite` 的消息类型屏蔽在本库内部。

pub mod transport;
