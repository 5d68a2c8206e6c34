// invoice_status_sync/src/ws_client/link.rs

//! 传输层接缝：`Connector` 打开一条原始的帧链路，
//! STOMP 握手与会话管理由 `ConnectionManager` 在链路之上完成。

use async_trait::async_trait;
use futures_util::SinkExt;
use log::{debug, error, info, warn};
use stomp_ws_utils::client::transport;
use stomp_ws_utils::{WireEvent, WsError};
use tokio::sync::mpsc;
use url::Url;

use crate::error::SyncError;

/// 一条已打开、尚未握手的帧链路。
///
/// `outbound` 的所有发送端都被丢弃后链路关闭；`inbound` 返回 `None` 表示对端已断开。
#[derive(Debug)]
pub struct FrameLink {
    pub outbound: mpsc::UnboundedSender<WireEvent>,
    pub inbound: mpsc::UnboundedReceiver<WireEvent>,
}

/// 打开到推送端的传输链路。
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<FrameLink, SyncError>;
}

/// 基于 `stomp_ws_utils` 客户端传输层的生产实现。
///
/// 每条链路由两个后台任务驱动：写任务把 `outbound` 中的事件写入 WebSocket，
/// 读任务把收到的帧与心跳转发到 `inbound`。
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<FrameLink, SyncError> {
        let connection = transport::connect_client(endpoint).await?;
        let mut ws_sender = connection.ws_sender;
        let mut ws_receiver = connection.ws_receiver;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireEvent>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WireEvent>();

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                if let Err(e) = transport::send_event(&mut ws_sender, &event).await {
                    warn!("[传输链路] (写任务) 发送失败，停止写出: {}", e);
                    break;
                }
            }
            if let Err(e) = ws_sender.close().await {
                debug!("[传输链路] (写任务) 关闭 WebSocket 发送端时出错: {}", e);
            }
            debug!("[传输链路] (写任务) 已结束。");
        });

        tokio::spawn(async move {
            loop {
                match transport::receive_event(&mut ws_receiver).await {
                    Some(Ok(event)) => {
                        if inbound_tx.send(event).is_err() {
                            debug!("[传输链路] (读任务) 会话已释放接收端，停止读取。");
                            break;
                        }
                    }
                    Some(Err(WsError::FrameDecode(reason))) => {
                        warn!("[传输链路] (读任务) 收到无法解析的 STOMP 帧，已丢弃: {}", reason);
                    }
                    Some(Err(WsError::Message(reason))) => {
                        warn!("[传输链路] (读任务) {}", reason);
                    }
                    Some(Err(e)) => {
                        error!("[传输链路] (读任务) 接收时发生错误，链路关闭: {}", e);
                        break;
                    }
                    None => {
                        info!("[传输链路] (读任务) 对端已关闭连接。");
                        break;
                    }
                }
            }
        });

        Ok(FrameLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
