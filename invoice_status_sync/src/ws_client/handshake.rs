// invoice_status_sync/src/ws_client/handshake.rs

//! STOMP 握手：发送 CONNECT，等待 CONNECTED 或 ERROR，并协商心跳间隔。

use log::{debug, info, warn};
use std::time::Duration;
use stomp_ws_utils::message::{HeartBeat, headers};
use stomp_ws_utils::{StompCommand, StompFrame, WireEvent};
use tokio::sync::mpsc;

use super::link::FrameLink;
use crate::error::SyncError;

/// 握手完成、可以承载订阅的会话链路。
#[derive(Debug)]
pub struct EstablishedLink {
    pub outbound: mpsc::UnboundedSender<WireEvent>,
    pub inbound: mpsc::UnboundedReceiver<WireEvent>,
    /// 本端发送心跳的间隔，`None` 表示不发送。
    pub outgoing_heartbeat: Option<Duration>,
    /// 期望收到对端流量的间隔，`None` 表示不检测。
    pub incoming_heartbeat: Option<Duration>,
}

/// 在已打开的链路上完成握手。超时由调用方控制。
pub async fn perform_handshake(
    link: FrameLink,
    host: &str,
    token: &str,
    heartbeat: HeartBeat,
) -> Result<EstablishedLink, SyncError> {
    if token.chars().any(char::is_control) {
        warn!("[握手] 凭证包含控制字符，拒绝发送 CONNECT。");
        return Err(SyncError::InvalidCredential);
    }
    let FrameLink {
        outbound,
        mut inbound,
    } = link;

    let authorization = format!("Bearer {}", token);
    let connect = StompFrame::connect(host, heartbeat, Some(&authorization));
    outbound
        .send(WireEvent::Frame(connect))
        .map_err(|_| SyncError::Transport("握手前链路已关闭".to_string()))?;
    debug!("[握手] CONNECT 已发送，host={}, heart-beat={}", host, heartbeat);

    let reply = loop {
        match inbound.recv().await {
            Some(WireEvent::Frame(frame)) => break frame,
            Some(WireEvent::Heartbeat) => continue,
            None => {
                return Err(SyncError::Transport(
                    "等待握手应答时连接被关闭".to_string(),
                ));
            }
        }
    };

    match reply.command {
        StompCommand::Connected => {
            let server_heartbeat = reply
                .get_header(headers::HEART_BEAT)
                .and_then(HeartBeat::parse)
                .unwrap_or_default();
            let (outgoing, incoming) = heartbeat.negotiate(server_heartbeat);
            info!(
                "[握手] 已收到 CONNECTED (version={})，心跳协商结果: 发送 {} 毫秒 / 接收 {} 毫秒",
                reply.get_header(headers::VERSION).unwrap_or("?"),
                outgoing,
                incoming
            );
            Ok(EstablishedLink {
                outbound,
                inbound,
                outgoing_heartbeat: (outgoing > 0).then(|| Duration::from_millis(outgoing)),
                incoming_heartbeat: (incoming > 0).then(|| Duration::from_millis(incoming)),
            })
        }
        StompCommand::Error => {
            let reason = rejection_reason(&reply);
            warn!("[握手] 服务端拒绝了连接: {}", reason);
            Err(SyncError::HandshakeRejected(reason))
        }
        other => {
            warn!("[握手] 期望 CONNECTED，实际收到 {}", other);
            Err(SyncError::HandshakeRejected(format!(
                "握手应答不是 CONNECTED 而是 {}",
                other
            )))
        }
    }
}

/// ERROR 帧的原因：优先取 `message` 头部，其次取正文。
fn rejection_reason(frame: &StompFrame) -> String {
    match frame.get_header(headers::MESSAGE) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ if !frame.body.trim().is_empty() => frame.body.trim().to_string(),
        _ => "服务端未给出原因".to_string(),
    }
}
