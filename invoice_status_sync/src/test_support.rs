// invoice_status_sync/src/test_support.rs

//! 单元测试用的内存传输。

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stomp_ws_utils::message::headers;
use stomp_ws_utils::{StompCommand, StompFrame, WireEvent};
use tokio::sync::mpsc;
use url::Url;

use crate::error::SyncError;
use crate::ws_client::{Connector, FrameLink};

/// 每次 `open()` 的预设结果；脚本用完后一律按 `Refuse` 处理。
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// 立即应答 CONNECTED (不协商心跳)。
    Accept,
    /// 立即应答带 `heart-beat` 的 CONNECTED。
    AcceptWithHeartBeat(u64, u64),
    /// 立即应答 ERROR。
    Reject(String),
    /// 链路打开但不应答，由测试通过 `FakeSession::accept` 手动完成握手。
    Silent,
    /// 传输层拒绝连接。
    Refuse,
}

/// 测试一侧的链路端点。被丢弃时客户端会看到连接关闭。
pub(crate) struct FakeSession {
    pub from_client: mpsc::UnboundedReceiver<WireEvent>,
    pub to_client: mpsc::UnboundedSender<WireEvent>,
}

impl FakeSession {
    pub fn push(&self, frame: StompFrame) {
        let _ = self.to_client.send(WireEvent::Frame(frame));
    }

    pub fn accept(&self) {
        self.push(StompFrame::new(StompCommand::Connected).header(headers::VERSION, "1.2"));
    }
}

pub(crate) struct FakeConnector {
    script: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
    sessions: mpsc::UnboundedSender<FakeSession>,
}

impl FakeConnector {
    pub fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeSession>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            opens: AtomicUsize::new(0),
            sessions,
        });
        (connector, rx)
    }

    /// `open()` 被调用的次数。
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _endpoint: &Url) -> Result<FrameLink, SyncError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("脚本锁中毒")
            .pop_front()
            .unwrap_or(Script::Refuse);

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let session = FakeSession {
            from_client,
            to_client,
        };
        match next {
            Script::Refuse => return Err(SyncError::Transport("连接被拒绝".to_string())),
            Script::Accept => session.accept(),
            Script::AcceptWithHeartBeat(out, inc) => session.push(
                StompFrame::new(StompCommand::Connected)
                    .header(headers::VERSION, "1.2")
                    .header(headers::HEART_BEAT, format!("{},{}", out, inc)),
            ),
            Script::Reject(reason) => session.push(
                StompFrame::new(StompCommand::Error).header(headers::MESSAGE, reason),
            ),
            Script::Silent => {}
        }
        let _ = self.sessions.send(session);
        Ok(FrameLink { outbound, inbound })
    }
}

/// 构造一条发往指定订阅的 MESSAGE 帧。
pub(crate) fn status_frame(subscription_id: &str, body: &str) -> StompFrame {
    StompFrame::new(StompCommand::Message)
        .header(headers::SUBSCRIPTION, subscription_id)
        .header(headers::DESTINATION, "/topic/test")
        .header(headers::CONTENT_TYPE, "application/json")
        .body(body)
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
