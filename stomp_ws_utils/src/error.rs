// stomp_ws_utils/src/error.rs

//! 定义 WebSocket / STOMP 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// STOMP 帧无法解析 (命令未知、头部格式错误、缺少结束符等)。
    #[error("STOMP 帧解析错误: {0}")]
    FrameDecode(String),

    /// WebSocket 协议相关的错误，例如握手失败、连接被重置。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 无效的 URL 格式或不支持的协议。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 收到了本库不处理的消息类型 (例如二进制帧)。
    #[error("消息错误: {0}")]
    Message(String),
}
