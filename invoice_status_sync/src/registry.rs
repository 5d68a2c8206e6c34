// invoice_status_sync/src/registry.rs

//! 订阅注册表：主题 → 回调。
//!
//! 每个主题最多一条活动订阅；重复订阅是空操作。注册表只在锁内读写映射，
//! 从不在持锁期间调用回调，因此回调中可以安全地再次订阅或取消订阅。

use log::{debug, info, warn};
use status_models::{StatusMessage, Topic};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stomp_ws_utils::{StompFrame, WireEvent};
use tokio::sync::mpsc::UnboundedSender;

/// 状态事件回调。
pub type StatusCallback = Arc<dyn Fn(StatusMessage) + Send + Sync>;

/// 传输层订阅的取消句柄：持有订阅 id 与所在链路的发送端。
#[derive(Debug)]
pub struct LiveHandle {
    id: String,
    outbound: UnboundedSender<WireEvent>,
}

impl LiveHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 向服务端发送 UNSUBSCRIBE。链路已关闭时静默忽略。
    fn cancel(self) {
        if self
            .outbound
            .send(WireEvent::Frame(StompFrame::unsubscribe(&self.id)))
            .is_err()
        {
            debug!("[订阅注册表] 链路已关闭，订阅 {} 无需发送 UNSUBSCRIBE。", self.id);
        }
    }
}

struct Subscription {
    callback: StatusCallback,
    handle: LiveHandle,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<Topic, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<Topic, Subscription>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册主题并在链路上发送 SUBSCRIBE。
    ///
    /// 主题已存在时不做任何事并返回 `false`。
    pub fn subscribe(
        &self,
        topic: Topic,
        callback: StatusCallback,
        outbound: UnboundedSender<WireEvent>,
    ) -> bool {
        let mut entries = self.lock_entries();
        if entries.contains_key(&topic) {
            debug!("[订阅注册表] 主题 {} 已有活动订阅，忽略重复订阅。", topic);
            return false;
        }

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let frame = StompFrame::subscribe(&id, &topic.destination());
        if outbound.send(WireEvent::Frame(frame)).is_err() {
            warn!("[订阅注册表] 发送 SUBSCRIBE ({}) 时链路已关闭。", topic);
        }
        info!("[订阅注册表] 已订阅主题 {} (订阅 id: {})", topic, id);
        entries.insert(
            topic,
            Subscription {
                callback,
                handle: LiveHandle { id, outbound },
            },
        );
        true
    }

    /// 取消单个主题；主题不存在时为空操作，返回 `false`。
    pub fn unsubscribe(&self, topic: Topic) -> bool {
        let removed = self.lock_entries().remove(&topic);
        match removed {
            Some(subscription) => {
                info!(
                    "[订阅注册表] 取消订阅主题 {} (订阅 id: {})",
                    topic,
                    subscription.handle.id()
                );
                subscription.handle.cancel();
                true
            }
            None => {
                debug!("[订阅注册表] 主题 {} 没有活动订阅，无需取消。", topic);
                false
            }
        }
    }

    /// 仅当主题当前登记的正是 `callback` 时才取消订阅，避免误删其他关注者的订阅。
    pub fn unsubscribe_owned(&self, topic: Topic, callback: &StatusCallback) -> bool {
        let removed = {
            let mut entries = self.lock_entries();
            match entries.get(&topic).map(|s| Arc::ptr_eq(&s.callback, callback)) {
                Some(true) => entries.remove(&topic),
                Some(false) => {
                    debug!("[订阅注册表] 主题 {} 的订阅属于其他关注者，保留不动。", topic);
                    None
                }
                None => None,
            }
        };
        let Some(subscription) = removed else {
            return false;
        };
        info!(
            "[订阅注册表] 取消订阅主题 {} (订阅 id: {})",
            topic,
            subscription.handle.id()
        );
        subscription.handle.cancel();
        true
    }

    /// 取消并清空全部订阅，返回被取消的数量。
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<_> = self.lock_entries().drain().collect();
        let count = drained.len();
        for (_, subscription) in drained {
            subscription.handle.cancel();
        }
        if count > 0 {
            info!("[订阅注册表] 已取消全部 {} 个订阅。", count);
        }
        count
    }

    /// 传输已丢失时清空注册表，不再向旧链路发送 UNSUBSCRIBE。
    pub fn forget_all(&self) -> usize {
        let mut entries = self.lock_entries();
        let count = entries.len();
        entries.clear();
        if count > 0 {
            warn!("[订阅注册表] 连接丢失，已丢弃 {} 个失效订阅，等待重新订阅。", count);
        }
        count
    }

    /// 按订阅 id 查找回调。
    pub fn callback_for(&self, subscription_id: &str) -> Option<StatusCallback> {
        self.lock_entries()
            .values()
            .find(|s| s.handle.id() == subscription_id)
            .map(|s| s.callback.clone())
    }

    /// 按主题查找回调。
    pub fn callback_for_topic(&self, topic: Topic) -> Option<StatusCallback> {
        self.lock_entries().get(&topic).map(|s| s.callback.clone())
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.lock_entries().contains_key(&topic)
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.lock_entries().keys().copied().collect()
    }
}
