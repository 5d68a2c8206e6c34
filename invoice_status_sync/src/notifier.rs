// invoice_status_sync/src/notifier.rs

//! 面向使用方的状态通知器。
//!
//! `StatusStateNotifier` 为单个关注对象 (一张发票或一家公司) 管理完整的生命周期：
//! 获取凭证、按需建立连接、订阅对应主题；每当连接重新进入 connected 状态时自动重新订阅；
//! 关注对象变化或通知器被丢弃时取消订阅。关注对象为空时什么也不做。

use log::{debug, info, warn};
use status_models::{StatusMessage, Topic};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::registry::StatusCallback;
use crate::state::ConnectionState;
use crate::ws_client::ConnectionManager;

/// 访问凭证的来源。每次需要连接时调用，便于返回刷新后的凭证。
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// 固定凭证。
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// 单个关注对象的通知器。
///
/// 每个主题在共享连接上最多只有一条订阅。多个通知器关注同一主题时，只有最先订阅成功的
/// 那个回调会收到事件；释放时也只会取消自己登记的订阅。最先订阅的通知器被丢弃后，
/// 其余关注者要等到下一次进入 connected 状态 (或调用 `reconnect()`) 才会重新订阅。
pub struct StatusStateNotifier {
    manager: ConnectionManager,
    tokens: Arc<dyn TokenSource>,
    target: Option<Topic>,
    callback: StatusCallback,
    resubscriber: Option<JoinHandle<()>>,
}

impl StatusStateNotifier {
    /// 开始关注 `target`。
    ///
    /// `target` 为 `None` 时不连接、不订阅也不报错。连接失败不会让本方法失败：
    /// 错误被记录，`connection_state()` 反映结果，可以调用 `reconnect()` 重试。
    pub async fn watch<F>(
        manager: ConnectionManager,
        tokens: impl TokenSource + 'static,
        target: Option<Topic>,
        callback: F,
    ) -> Self
    where
        F: Fn(StatusMessage) + Send + Sync + 'static,
    {
        let mut notifier = Self {
            manager,
            tokens: Arc::new(tokens),
            target: None,
            callback: Arc::new(callback),
            resubscriber: None,
        };
        notifier.retarget(target).await;
        notifier
    }

    /// 切换关注对象：取消旧主题的订阅，再按新主题连接并订阅。
    pub async fn retarget(&mut self, target: Option<Topic>) {
        if self.target == target && self.resubscriber.is_some() {
            return;
        }
        self.release();
        self.target = target;

        let Some(topic) = target else {
            debug!("[状态通知器] 没有关注对象，不执行任何操作。");
            return;
        };
        info!("[状态通知器] 开始关注主题 {}", topic);
        self.resubscriber = Some(spawn_resubscriber(
            self.manager.clone(),
            topic,
            self.callback.clone(),
        ));

        if let Err(e) = self.ensure_connected().await {
            warn!("[状态通知器] 建立连接失败: {}", e);
            return;
        }
        self.subscribe_current();
    }

    /// 强制断开并用新获取的凭证重新连接，然后重新订阅当前主题。
    ///
    /// 断开会影响共享同一连接的所有订阅者。
    pub async fn reconnect(&self) -> Result<(), SyncError> {
        info!("[状态通知器] 手动重连。");
        self.manager.disconnect();
        let token = self
            .tokens
            .bearer_token()
            .ok_or(SyncError::MissingCredential)?;
        self.manager.connect(&token).await?;
        self.subscribe_current();
        Ok(())
    }

    /// 可观察的连接状态。
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.connection_state()
    }

    pub fn target(&self) -> Option<Topic> {
        self.target
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    async fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.manager.is_connected() {
            return Ok(());
        }
        let token = self
            .tokens
            .bearer_token()
            .ok_or(SyncError::MissingCredential)?;
        match self.manager.connect(&token).await {
            // 其他调用方正在连接，连接成功后由重订阅任务完成订阅
            Ok(()) | Err(SyncError::ConnectionInProgress) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn subscribe_current(&self) {
        if let Some(topic) = self.target {
            if let Err(e) = self.manager.subscribe(topic, self.callback.clone()) {
                debug!("[状态通知器] 暂时无法订阅 {}: {}", topic, e);
            }
        }
    }

    fn release(&mut self) {
        if let Some(handle) = self.resubscriber.take() {
            handle.abort();
        }
        if let Some(topic) = self.target.take() {
            info!("[状态通知器] 停止关注主题 {}", topic);
            self.manager.unsubscribe_owned(topic, &self.callback);
        }
    }
}

impl Drop for StatusStateNotifier {
    fn drop(&mut self) {
        self.release();
    }
}

/// 连接每次进入 connected 状态时重新订阅；进入 error 状态时提示订阅已失效。
fn spawn_resubscriber(
    manager: ConnectionManager,
    topic: Topic,
    callback: StatusCallback,
) -> JoinHandle<()> {
    let mut updates = manager.state_updates();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = *updates.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    if let Err(e) = manager.subscribe(topic, callback.clone()) {
                        debug!("[状态通知器] 重新订阅 {} 失败: {}", topic, e);
                    }
                }
                ConnectionState::Error => {
                    warn!(
                        "[状态通知器] 连接处于 error 状态，主题 {} 暂时收不到状态更新 (已重连 {}/{} 次)。",
                        topic,
                        manager.reconnect_attempt(),
                        manager.max_reconnect_attempts()
                    );
                }
                ConnectionState::Connecting | ConnectionState::Disconnected => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnector, FakeSession, Script, init_logger, status_frame};
    use crate::ws_client::{ManagerOptions, ReconnectPolicy};
    use status_models::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use stomp_ws_utils::message::{HeartBeat, headers};
    use stomp_ws_utils::{StompCommand, WireEvent};
    use tokio::sync::mpsc;
    use url::Url;

    fn manager(
        script: Vec<Script>,
    ) -> (
        ConnectionManager,
        Arc<FakeConnector>,
        mpsc::UnboundedReceiver<FakeSession>,
    ) {
        init_logger();
        let (connector, sessions) = FakeConnector::new(script);
        let options = ManagerOptions {
            reconnect: ReconnectPolicy::new(Duration::from_millis(100), 3),
            handshake_timeout: Duration::from_millis(1000),
            heartbeat: HeartBeat::new(0, 0),
        };
        let endpoint = Url::parse("ws://push.test/ws").expect("URL 无效");
        let manager = ConnectionManager::with_connector(endpoint, options, connector.clone());
        (manager, connector, sessions)
    }

    fn subscribe_ids(session: &mut FakeSession) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(event) = session.from_client.try_recv() {
            if let WireEvent::Frame(frame) = event {
                if frame.command == StompCommand::Subscribe {
                    ids.extend(frame.get_header(headers::ID).map(str::to_string));
                }
            }
        }
        ids
    }

    fn counting_tokens() -> (impl TokenSource + 'static, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some(format!("token-{}", n))
        };
        (source, calls)
    }

    #[tokio::test]
    async fn test_absent_target_does_nothing() {
        let (manager, connector, _sessions) = manager(vec![Script::Accept]);
        let (tokens, calls) = counting_tokens();
        let notifier = StatusStateNotifier::watch(manager.clone(), tokens, None, |_| {}).await;

        assert_eq!(connector.opens(), 0, "没有关注对象时不应连接");
        assert_eq!(calls.load(Ordering::SeqCst), 0, "没有关注对象时不应获取凭证");
        assert!(manager.subscribed_topics().is_empty());
        assert_eq!(notifier.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_watch_connects_and_subscribes() {
        let (manager, _connector, mut sessions) = manager(vec![Script::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Invoice(42)),
            move |msg| {
                let _ = tx.send(msg);
            },
        )
        .await;
        assert_eq!(notifier.connection_state(), ConnectionState::Connected);
        assert!(manager.is_subscribed(Topic::Invoice(42)));

        let mut session = sessions.recv().await.expect("应有会话");
        let ids = subscribe_ids(&mut session);
        assert_eq!(ids.len(), 1);
        session.push(status_frame(
            &ids[0],
            r#"{"invoiceId":42,"status":"PENDING","timestamp":1000}"#,
        ));
        session.push(status_frame(
            &ids[0],
            r#"{"invoiceId":42,"status":"ACCEPTED","txId":"TX-1","timestamp":2000}"#,
        ));
        assert_eq!(rx.recv().await.map(|m| m.status), Some(StatusCode::Pending));
        assert_eq!(rx.recv().await.map(|m| m.status), Some(StatusCode::Accepted));
    }

    #[tokio::test]
    async fn test_drop_and_retarget_unsubscribe() {
        let (manager, _connector, _sessions) = manager(vec![Script::Accept]);
        let mut notifier = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Invoice(1)),
            |_| {},
        )
        .await;
        let other = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Company(9)),
            |_| {},
        )
        .await;

        notifier.retarget(Some(Topic::Invoice(2))).await;
        assert!(!manager.is_subscribed(Topic::Invoice(1)));
        assert!(manager.is_subscribed(Topic::Invoice(2)));

        drop(notifier);
        assert!(!manager.is_subscribed(Topic::Invoice(2)));
        assert!(manager.is_subscribed(Topic::Company(9)), "其他关注者的订阅不受影响");
        assert!(manager.is_connected(), "通知器被丢弃不应断开共享连接");
        drop(other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_reconnect() {
        let (manager, _connector, mut sessions) = manager(vec![Script::Accept, Script::Accept]);
        let _notifier = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Company(5)),
            |_| {},
        )
        .await;
        drop(sessions.recv().await.expect("应有会话"));

        let mut reconnected = sessions.recv().await.expect("重连后应有新会话");
        let mut updates = manager.state_updates();
        updates
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .expect("状态通道已关闭");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(manager.is_subscribed(Topic::Company(5)));
        assert_eq!(subscribe_ids(&mut reconnected).len(), 1, "重连后应重新发送 SUBSCRIBE");
    }

    #[tokio::test]
    async fn test_reconnect_uses_fresh_token() {
        let (manager, connector, mut sessions) = manager(vec![Script::Accept, Script::Accept]);
        let (tokens, calls) = counting_tokens();
        let notifier =
            StatusStateNotifier::watch(manager.clone(), tokens, Some(Topic::Invoice(3)), |_| {})
                .await;
        notifier.reconnect().await.expect("手动重连应成功");

        assert_eq!(connector.opens(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_subscribed(Topic::Invoice(3)));

        let _first = sessions.recv().await.expect("应有第一个会话");
        let mut second = sessions.recv().await.expect("应有第二个会话");
        match second.from_client.try_recv() {
            Ok(WireEvent::Frame(frame)) => {
                assert_eq!(frame.get_header(headers::AUTHORIZATION), Some("Bearer token-2"))
            }
            other => panic!("第一条出站消息应为 CONNECT，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let (manager, connector, _sessions) = manager(vec![Script::Accept]);
        let notifier = StatusStateNotifier::watch(
            manager,
            || None::<String>,
            Some(Topic::Invoice(8)),
            |_| {},
        )
        .await;
        assert_eq!(connector.opens(), 0);
        assert_eq!(notifier.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(
            notifier.reconnect().await,
            Err(SyncError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_observable() {
        let (manager, _connector, _sessions) =
            manager(vec![Script::Reject("bad token".to_string()), Script::Accept]);
        let notifier = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Invoice(4)),
            |_| {},
        )
        .await;
        assert_eq!(notifier.connection_state(), ConnectionState::Error);
        assert!(!manager.is_subscribed(Topic::Invoice(4)));

        notifier.reconnect().await.expect("重试应成功");
        assert!(manager.is_subscribed(Topic::Invoice(4)));
    }

    #[tokio::test]
    async fn test_drop_keeps_subscription_owned_by_other_watcher() {
        let (manager, _connector, mut sessions) = manager(vec![Script::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Invoice(42)),
            move |msg| {
                let _ = tx.send(msg);
            },
        )
        .await;
        let second = StatusStateNotifier::watch(
            manager.clone(),
            StaticToken("abc".to_string()),
            Some(Topic::Invoice(42)),
            |_| {},
        )
        .await;

        drop(second);
        assert!(manager.is_subscribed(Topic::Invoice(42)), "后来者释放时不应取消他人的订阅");

        let mut session = sessions.recv().await.expect("应有会话");
        let ids = subscribe_ids(&mut session);
        assert_eq!(ids.len(), 1);
        session.push(status_frame(
            &ids[0],
            r#"{"invoiceId":42,"status":"ACCEPTED","timestamp":5}"#,
        ));
        assert_eq!(rx.recv().await.map(|m| m.status), Some(StatusCode::Accepted));

        drop(first);
        assert!(!manager.is_subscribed(Topic::Invoice(42)));
    }
}
