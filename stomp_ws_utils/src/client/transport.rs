// stomp_ws_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 提供建立到推送端的连接、发送 `WireEvent` (STOMP 帧或心跳)
//! 以及从任意 tungstenite 消息流中读取下一条 `WireEvent` 的能力。

use futures_util::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::Error as TungsteniteError,
    tungstenite::protocol::Message,
};
use url::Url;

use crate::error::WsError;
use crate::message::WireEvent;

/// 可能经过 TLS 加密的客户端 WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端 WebSocket 连接，已拆分为发送端与接收端。
pub struct ClientConnection {
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一个帧或心跳。
    pub async fn send_event(&mut self, event: &WireEvent) -> Result<(), WsError> {
        send_event(&mut self.ws_sender, event).await
    }

    /// 读取下一条帧或心跳；连接关闭时返回 `None`。
    pub async fn receive_event(&mut self) -> Option<Result<WireEvent, WsError>> {
        receive_event(&mut self.ws_receiver).await
    }
}

/// 通过任意 tungstenite 发送端写出一个 `WireEvent`。
pub async fn send_event<S>(sink: &mut S, event: &WireEvent) -> Result<(), WsError>
where
    S: futures_util::Sink<Message, Error = TungsteniteError> + Unpin,
{
    if let WireEvent::Frame(frame) = event {
        debug!("客户端：准备发送帧: {}", frame);
    }
    sink.send(Message::Text(event.to_text())).await?;
    Ok(())
}

/// 连接到指定的 WebSocket 端点。仅接受 `ws` / `wss` 协议。
pub async fn connect_client(endpoint: &Url) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", endpoint);
    if !matches!(endpoint.scheme(), "ws" | "wss") {
        return Err(WsError::InvalidUrl(format!(
            "不支持的协议 '{}'，WebSocket 端点必须使用 ws 或 wss: {}",
            endpoint.scheme(),
            endpoint
        )));
    }

    match connect_async(endpoint.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", endpoint, response.status());
            debug!("客户端：WebSocket 连接响应头: {:?}", response.headers());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", endpoint, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从 tungstenite 消息流中读取并解析下一条 `WireEvent`。
///
/// Ping/Pong 等控制帧由底层库处理，这里直接跳过。返回值：
/// - `Some(Ok(event))`：收到一个 STOMP 帧或心跳。
/// - `Some(Err(WsError::FrameDecode(..)))`：文本无法解析为 STOMP 帧，连接仍可用。
/// - `Some(Err(..))`：其他底层错误。
/// - `None`：连接已关闭。
pub async fn receive_event<S>(ws_receiver: &mut S) -> Option<Result<WireEvent, WsError>>
where
    S: Stream<Item = Result<Message, TungsteniteError>> + Unpin,
{
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("客户端：收到原始文本消息，长度: {} 字节", text.len());
                break Some(WireEvent::from_text(&text));
            }
            Some(Ok(Message::Binary(bin))) => {
                debug!("客户端：收到原始二进制消息，长度: {} 字节", bin.len());
                break Some(Err(WsError::Message(
                    "收到了非预期的 WebSocket 二进制消息".to_string(),
                )));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                // 控制帧由 tokio-tungstenite 自动应答
            }
            Some(Ok(Message::Close(close_frame))) => {
                debug!("客户端：收到 Close 控制帧，详细信息: {:?}", close_frame);
                break None;
            }
            Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) => {
                debug!("客户端：连接已关闭 (ConnectionClosed / AlreadyClosed)。");
                break None;
            }
            Some(Err(e)) => {
                error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("客户端：WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}
