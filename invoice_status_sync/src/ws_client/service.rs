// invoice_status_sync/src/ws_client/service.rs

//! 连接管理器：持有唯一的共享推送连接。
//!
//! `ConnectionManager` 是一个可廉价克隆的句柄，所有克隆共享同一条连接、同一个订阅注册表
//! 与同一个状态机 (`disconnected → connecting → connected ⇄ error`)。
//!
//! 握手成功后由一个后台监督任务负责整条连接的生命周期：
//! 接收帧并分发、按协商结果收发心跳、检测断线，断线后在同一个任务中按线性退避顺序重连。
//! 每次 `connect()` / `disconnect()` 都会推进会话纪元 (epoch)，
//! 旧纪元的任务在修改任何共享状态前都会核对纪元，因此不会与新连接互相干扰。

use log::{debug, error, info, warn};
use status_models::{StatusMessage, Topic};
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use stomp_ws_utils::message::HeartBeat;
use stomp_ws_utils::{StompFrame, WireEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use super::handshake::{EstablishedLink, perform_handshake};
use super::link::{Connector, WebSocketConnector};
use super::reconnect::ReconnectPolicy;
use crate::config::SyncConfig;
use crate::dispatcher;
use crate::error::SyncError;
use crate::registry::{StatusCallback, SubscriptionRegistry};
use crate::state::ConnectionState;

/// 连接管理器的可调参数。
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub reconnect: ReconnectPolicy,
    /// 打开传输并完成握手的总时限。
    pub handshake_timeout: Duration,
    /// 在 CONNECT 中声明的心跳 (本端发送间隔, 期望接收间隔)。
    pub heartbeat: HeartBeat,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_millis(10_000),
            heartbeat: HeartBeat::new(10_000, 10_000),
        }
    }
}

impl From<&SyncConfig> for ManagerOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reconnect: ReconnectPolicy::new(
                config.reconnect_base_delay(),
                config.max_reconnect_attempts,
            ),
            handshake_timeout: config.handshake_timeout(),
            heartbeat: HeartBeat::new(config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms),
        }
    }
}

/// 受会话锁保护的可变状态。
#[derive(Default)]
struct Session {
    /// 每次 connect / disconnect 递增。
    epoch: u64,
    /// 当前活动链路的发送端；只有在 connected 时为 `Some`。
    outbound: Option<mpsc::UnboundedSender<WireEvent>>,
    /// 监督任务 (会话循环 + 重连循环)。
    supervisor: Option<JoinHandle<()>>,
    reconnect_attempt: u32,
    /// 最近一次 connect() 使用的凭证，重连时复用。
    token: Option<String>,
}

struct Shared {
    endpoint: Url,
    options: ManagerOptions,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    registry: SubscriptionRegistry,
    session: Mutex<Session>,
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// 只能在持有会话锁时调用。
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!("[连接管理器] 连接状态: {} -> {}", previous, next);
        }
    }

    /// 打开传输并完成握手，整个过程受握手时限约束。
    async fn establish(&self, token: &str) -> Result<EstablishedLink, SyncError> {
        let host = self.endpoint.host_str().unwrap_or("localhost").to_string();
        let attempt = async {
            let link = self.connector.open(&self.endpoint).await?;
            perform_handshake(link, &host, token, self.options.heartbeat).await
        };
        match tokio::time::timeout(self.options.handshake_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.options.handshake_timeout.as_millis() as u64;
                warn!("[连接管理器] 握手在 {} 毫秒内未完成。", millis);
                Err(SyncError::HandshakeTimeout(millis))
            }
        }
    }
}

/// 最后一个句柄释放时停止监督任务，链路随之关闭。
impl Drop for Shared {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = session.supervisor.take() {
            debug!("[连接管理器] 所有句柄已释放，停止监督任务。");
            handle.abort();
        }
    }
}

/// 共享推送连接的句柄。克隆得到的句柄指向同一条连接。
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// 按配置创建使用 WebSocket 传输的管理器。此时不会建立连接。
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_connector(
            config.endpoint(),
            ManagerOptions::from(config),
            Arc::new(WebSocketConnector),
        )
    }

    /// 使用自定义传输创建管理器。
    pub fn with_connector(
        endpoint: Url,
        options: ManagerOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        info!("[连接管理器] 正在初始化，推送端点: {}", endpoint);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                endpoint,
                options,
                connector,
                state_tx,
                registry: SubscriptionRegistry::new(),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    /// 建立并认证连接。
    ///
    /// - 已连接时直接返回 `Ok(())`。
    /// - 已有连接尝试进行中 (包括后台重连中的一次尝试) 时立即返回 `ConnectionInProgress`。
    /// - 后台重连正在等待下一次尝试时，取消该重连循环并用新凭证连接。
    /// - 握手被拒绝返回 `HandshakeRejected`；传输失败或超时返回相应错误，状态停在 error，
    ///   不会为这次调用自动重试。
    /// - 握手完成前调用了 `disconnect()` 时，新链路被丢弃并返回 `Aborted`。
    pub async fn connect(&self, token: &str) -> Result<(), SyncError> {
        let epoch = {
            let mut session = self.shared.lock_session();
            match self.shared.state() {
                ConnectionState::Connected => {
                    debug!("[连接管理器] 已处于连接状态，connect() 直接返回。");
                    return Ok(());
                }
                ConnectionState::Connecting => {
                    warn!("[连接管理器] 已有连接尝试正在进行，拒绝本次 connect()。");
                    return Err(SyncError::ConnectionInProgress);
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }
            if let Some(handle) = session.supervisor.take() {
                info!("[连接管理器] 取消仍在等待的后台重连任务。");
                handle.abort();
            }
            session.epoch += 1;
            session.outbound = None;
            session.token = Some(token.to_string());
            self.shared.set_state(ConnectionState::Connecting);
            session.epoch
        };

        info!("[连接管理器] 开始连接到 {}", self.shared.endpoint);
        let mut pending = PendingConnect {
            shared: &self.shared,
            epoch,
            settled: false,
        };
        let result = self.shared.establish(token).await;
        pending.settled = true;

        let mut session = self.shared.lock_session();
        if session.epoch != epoch {
            return match result {
                Ok(_) => {
                    warn!("[连接管理器] 握手完成前连接已被断开，丢弃新建立的链路。");
                    Err(SyncError::Aborted)
                }
                Err(e) => Err(e),
            };
        }
        match result {
            Ok(link) => {
                session.outbound = Some(link.outbound.clone());
                session.reconnect_attempt = 0;
                let weak = Arc::downgrade(&self.shared);
                session.supervisor = Some(tokio::spawn(supervise(weak, epoch, link)));
                self.shared.set_state(ConnectionState::Connected);
                info!("[连接管理器] 连接已建立。");
                Ok(())
            }
            Err(e) => {
                error!("[连接管理器] 建立连接失败: {}", e);
                self.shared.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// 取消全部订阅、关闭传输并重置重连计数。从不失败。
    pub fn disconnect(&self) {
        let mut session = self.shared.lock_session();
        session.epoch += 1;
        session.reconnect_attempt = 0;
        session.token = None;
        self.shared.registry.unsubscribe_all();
        if let Some(outbound) = session.outbound.take() {
            if outbound
                .send(WireEvent::Frame(StompFrame::disconnect()))
                .is_err()
            {
                debug!("[连接管理器] 链路已关闭，跳过 DISCONNECT 帧。");
            }
        }
        if let Some(handle) = session.supervisor.take() {
            handle.abort();
        }
        if self.shared.state() != ConnectionState::Disconnected {
            info!("[连接管理器] 连接已主动断开。");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// 订阅连接状态的变化。
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// 当前连续重连的次数；连接成功或主动断开后归零。
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.lock_session().reconnect_attempt
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.shared.options.reconnect.max_attempts
    }

    /// 订阅一个主题。未连接时返回 `NotConnected` 且不登记任何内容；主题已订阅时为空操作。
    pub fn subscribe(&self, topic: Topic, callback: StatusCallback) -> Result<(), SyncError> {
        let session = self.shared.lock_session();
        let outbound = self.live_outbound(&session).ok_or_else(|| {
            warn!("[连接管理器] 未连接，无法订阅主题 {}", topic);
            SyncError::NotConnected
        })?;
        self.shared.registry.subscribe(topic, callback, outbound);
        Ok(())
    }

    pub fn subscribe_to_invoice_status<F>(&self, invoice_id: i64, callback: F) -> Result<(), SyncError>
    where
        F: Fn(StatusMessage) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Invoice(invoice_id), Arc::new(callback))
    }

    pub fn subscribe_to_company_invoices<F>(&self, company_id: i64, callback: F) -> Result<(), SyncError>
    where
        F: Fn(StatusMessage) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Company(company_id), Arc::new(callback))
    }

    /// 取消发票主题订阅；没有订阅时为空操作。
    pub fn unsubscribe(&self, invoice_id: i64) {
        self.unsubscribe_topic(Topic::Invoice(invoice_id));
    }

    pub fn unsubscribe_from_company_invoices(&self, company_id: i64) {
        self.unsubscribe_topic(Topic::Company(company_id));
    }

    pub fn unsubscribe_topic(&self, topic: Topic) {
        self.shared.registry.unsubscribe(topic);
    }

    /// 只有当 `callback` 就是该主题登记的回调时才取消订阅。
    pub(crate) fn unsubscribe_owned(&self, topic: Topic, callback: &StatusCallback) {
        self.shared.registry.unsubscribe_owned(topic, callback);
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.shared.registry.contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.shared.registry.topics()
    }

    /// 以通道形式订阅发票主题，事件按分发顺序送达。
    pub fn invoice_status_stream(
        &self,
        invoice_id: i64,
    ) -> Result<mpsc::UnboundedReceiver<StatusMessage>, SyncError> {
        self.topic_stream(Topic::Invoice(invoice_id))
    }

    pub fn company_invoices_stream(
        &self,
        company_id: i64,
    ) -> Result<mpsc::UnboundedReceiver<StatusMessage>, SyncError> {
        self.topic_stream(Topic::Company(company_id))
    }

    /// 主题已有订阅时返回 `AlreadySubscribed`，而不是返回一个永远收不到事件的通道。
    pub fn topic_stream(
        &self,
        topic: Topic,
    ) -> Result<mpsc::UnboundedReceiver<StatusMessage>, SyncError> {
        let session = self.shared.lock_session();
        let outbound = self.live_outbound(&session).ok_or(SyncError::NotConnected)?;
        if self.shared.registry.contains(topic) {
            return Err(SyncError::AlreadySubscribed(topic));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: StatusCallback = Arc::new(move |message| {
            if tx.send(message).is_err() {
                debug!("[连接管理器] 主题 {} 的通道接收端已关闭，事件被丢弃。", topic);
            }
        });
        self.shared.registry.subscribe(topic, callback, outbound);
        Ok(rx)
    }

    fn live_outbound(&self, session: &Session) -> Option<mpsc::UnboundedSender<WireEvent>> {
        if self.shared.state() != ConnectionState::Connected {
            return None;
        }
        session.outbound.clone()
    }
}

/// `connect()` 的 future 在握手结束前被丢弃时，把停留在 connecting 的状态复位为 disconnected。
struct PendingConnect<'a> {
    shared: &'a Shared,
    epoch: u64,
    settled: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let session = self.shared.lock_session();
        if session.epoch == self.epoch && self.shared.state() == ConnectionState::Connecting {
            warn!("[连接管理器] connect() 在握手完成前被取消。");
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

/// 会话结束的原因。
#[derive(Debug)]
enum SessionEnd {
    /// 链路关闭或写出失败。
    Closed,
    /// 超过两倍接收心跳间隔没有任何入站流量。
    HeartbeatTimeout(Duration),
    /// 管理器的所有句柄都已释放。
    ManagerDropped,
}

/// 监督任务：运行会话，断线后按策略重连，直到重连耗尽、握手被拒绝或纪元失效。
async fn supervise(weak: Weak<Shared>, epoch: u64, first_link: EstablishedLink) {
    let mut link = first_link;
    loop {
        let end = run_session(&weak, &mut link).await;
        drop(link);

        let Some(shared) = weak.upgrade() else {
            return;
        };
        if let SessionEnd::ManagerDropped = end {
            return;
        }
        {
            let mut session = shared.lock_session();
            if session.epoch != epoch {
                return;
            }
            warn!("[连接管理器] (监督任务) 连接意外中断: {:?}", end);
            session.outbound = None;
            shared.registry.forget_all();
            shared.set_state(ConnectionState::Error);
        }
        drop(shared);

        match reconnect_loop(&weak, epoch).await {
            Some(next) => link = next,
            None => return,
        }
    }
}

/// 接收并分发帧，维护心跳，直到链路中断。
async fn run_session(weak: &Weak<Shared>, link: &mut EstablishedLink) -> SessionEnd {
    let mut ping = link.outgoing_heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let silence_limit = link.incoming_heartbeat.map(|period| period * 2);
    let mut deadline = silence_limit.map(|limit| Instant::now() + limit);

    loop {
        tokio::select! {
            event = link.inbound.recv() => {
                let Some(event) = event else {
                    return SessionEnd::Closed;
                };
                if let Some(limit) = silence_limit {
                    deadline = Some(Instant::now() + limit);
                }
                match event {
                    WireEvent::Frame(frame) => {
                        let Some(shared) = weak.upgrade() else {
                            return SessionEnd::ManagerDropped;
                        };
                        dispatcher::dispatch_frame(&shared.registry, frame);
                    }
                    WireEvent::Heartbeat => debug!("[连接管理器] (监督任务) 收到服务端心跳。"),
                }
            }
            _ = next_tick(&mut ping) => {
                if link.outbound.send(WireEvent::Heartbeat).is_err() {
                    return SessionEnd::Closed;
                }
            }
            _ = expire(deadline) => {
                return SessionEnd::HeartbeatTimeout(silence_limit.unwrap_or_default());
            }
        }
    }
}

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

/// 顺序重连：第 n 次尝试前等待 `base × n`。成功时返回新链路；
/// 次数耗尽、握手被拒绝、纪元失效或管理器被释放时返回 `None`。
async fn reconnect_loop(weak: &Weak<Shared>, epoch: u64) -> Option<EstablishedLink> {
    loop {
        let (attempt, delay, token) = {
            let shared = weak.upgrade()?;
            let mut session = shared.lock_session();
            if session.epoch != epoch {
                return None;
            }
            let attempt = session.reconnect_attempt + 1;
            let Some(delay) = shared.options.reconnect.delay_for(attempt) else {
                warn!(
                    "[连接管理器] (重连) 已达到最大重连次数 ({})，停止重试，连接保持 error 状态。",
                    shared.options.reconnect.max_attempts
                );
                return None;
            };
            let Some(token) = session.token.clone() else {
                warn!("[连接管理器] (重连) 没有可用的凭证，停止重试。");
                return None;
            };
            session.reconnect_attempt = attempt;
            (attempt, delay, token)
        };

        info!(
            "[连接管理器] (重连) 第 {} 次重连将在 {} 毫秒后进行。",
            attempt,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;

        let shared = weak.upgrade()?;
        {
            let session = shared.lock_session();
            if session.epoch != epoch {
                return None;
            }
            shared.set_state(ConnectionState::Connecting);
        }

        let result = shared.establish(&token).await;

        let mut session = shared.lock_session();
        if session.epoch != epoch {
            return None;
        }
        match result {
            Ok(link) => {
                session.outbound = Some(link.outbound.clone());
                session.reconnect_attempt = 0;
                shared.set_state(ConnectionState::Connected);
                info!("[连接管理器] (重连) 第 {} 次重连成功。", attempt);
                return Some(link);
            }
            Err(SyncError::HandshakeRejected(reason)) => {
                error!("[连接管理器] (重连) 握手被拒绝，停止重试: {}", reason);
                shared.set_state(ConnectionState::Error);
                return None;
            }
            Err(e) => {
                warn!("[连接管理器] (重连) 第 {} 次重连失败: {}", attempt, e);
                shared.set_state(ConnectionState::Error);
            }
        }
    }
}
