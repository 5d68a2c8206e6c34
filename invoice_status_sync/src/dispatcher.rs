// invoice_status_sync/src/dispatcher.rs

//! 入站帧的解码与分发。
//!
//! MESSAGE 帧按 `subscription` 头部路由到注册的回调；负载解析失败只记录日志并丢弃，
//! 既不调用回调，也不影响连接或订阅。回调在会话任务中同步执行，投递顺序即到达顺序。
//! 回调中的 panic 同样被隔离在这一条消息内，会话任务与其他订阅者照常工作。

use log::{debug, error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use status_models::{StatusMessage, Topic};
use stomp_ws_utils::message::headers;
use stomp_ws_utils::{StompCommand, StompFrame};

use crate::error::SyncError;
use crate::registry::SubscriptionRegistry;

/// 把 JSON 负载解析为状态事件。
pub fn decode_status(body: &str) -> Result<StatusMessage, SyncError> {
    serde_json::from_str(body).map_err(|e| SyncError::Decode(e.to_string()))
}

/// 处理一条会话期间收到的帧。返回是否有回调被调用并正常返回。
pub fn dispatch_frame(registry: &SubscriptionRegistry, frame: StompFrame) -> bool {
    match frame.command {
        StompCommand::Message => dispatch_message(registry, &frame),
        StompCommand::Error => {
            error!(
                "[消息分发] 服务端发送了 ERROR 帧: {}",
                frame
                    .get_header(headers::MESSAGE)
                    .unwrap_or_else(|| frame.body.trim())
            );
            false
        }
        StompCommand::Receipt => {
            debug!(
                "[消息分发] 收到 RECEIPT: {}",
                frame.get_header(headers::RECEIPT).unwrap_or("?")
            );
            false
        }
        other => {
            warn!("[消息分发] 会话期间收到非预期的 {} 帧，已忽略。", other);
            false
        }
    }
}

fn dispatch_message(registry: &SubscriptionRegistry, frame: &StompFrame) -> bool {
    let callback = match frame.get_header(headers::SUBSCRIPTION) {
        Some(id) => registry.callback_for(id),
        None => frame
            .get_header(headers::DESTINATION)
            .and_then(Topic::parse)
            .and_then(|topic| registry.callback_for_topic(topic)),
    };
    let Some(callback) = callback else {
        debug!(
            "[消息分发] MESSAGE (subscription={:?}, destination={:?}) 没有对应的订阅，已丢弃。",
            frame.get_header(headers::SUBSCRIPTION),
            frame.get_header(headers::DESTINATION)
        );
        return false;
    };

    match decode_status(&frame.body) {
        Ok(message) => {
            debug!(
                "[消息分发] 发票 {} 状态更新为 {}",
                message.invoice_id, message.status
            );
            let invoice_id = message.invoice_id;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => true,
                Err(payload) => {
                    error!(
                        "[消息分发] 发票 {} 的回调发生 panic，该消息已丢弃: {}",
                        invoice_id,
                        panic_reason(payload.as_ref())
                    );
                    false
                }
            }
        }
        Err(e) => {
            warn!(
                "[消息分发] 状态消息解码失败，已丢弃: {}，原始负载: {}",
                e, frame.body
            );
            false
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        *reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.as_str()
    } else {
        "未知原因"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StatusCallback;
    use status_models::StatusCode;
    use std::sync::{Arc, Mutex};
    use stomp_ws_utils::WireEvent;
    use tokio::sync::mpsc;

    fn message_for(sub_id: &str, body: &str) -> StompFrame {
        StompFrame::new(StompCommand::Message)
            .header(headers::SUBSCRIPTION, sub_id)
            .header(headers::MESSAGE_ID, "m-1")
            .body(body)
    }

    fn recording() -> (StatusCallback, Arc<Mutex<Vec<StatusMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |msg| sink.lock().expect("锁中毒").push(msg));
        (callback, seen)
    }

    fn subscribed_id(rx: &mut mpsc::UnboundedReceiver<WireEvent>) -> String {
        match rx.try_recv() {
            Ok(WireEvent::Frame(frame)) => frame
                .get_header(headers::ID)
                .expect("SUBSCRIBE 应带 id")
                .to_string(),
            other => panic!("应有 SUBSCRIBE 帧，实际: {:?}", other),
        }
    }

    #[test]
    fn test_decode_status() {
        let msg = decode_status(r#"{"invoiceId":42,"status":"ACCEPTED","txId":"TX-1","timestamp":2000}"#)
            .expect("解析失败");
        assert_eq!(msg.invoice_id, 42);
        assert_eq!(msg.status, StatusCode::Accepted);
        assert_eq!(msg.tx_id.as_deref(), Some("TX-1"));

        assert!(matches!(decode_status("{not json"), Err(SyncError::Decode(_))));
        assert!(matches!(
            decode_status(r#"{"invoiceId":42,"timestamp":1}"#),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            decode_status(r#"{"invoiceId":42,"status":"LOST","timestamp":1}"#),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    /// 发票 42 先后收到 PENDING 与 ACCEPTED，回调按顺序恰好被调用两次。
    fn test_pending_then_accepted_in_order() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (callback, seen) = recording();
        registry.subscribe(Topic::Invoice(42), callback, tx);
        let sub_id = subscribed_id(&mut rx);

        assert!(dispatch_frame(
            &registry,
            message_for(&sub_id, r#"{"invoiceId":42,"status":"PENDING","timestamp":1000}"#)
        ));
        assert!(dispatch_frame(
            &registry,
            message_for(&sub_id, r#"{"invoiceId":42,"status":"ACCEPTED","txId":"TX-1","timestamp":2000}"#)
        ));

        let seen = seen.lock().expect("锁中毒");
        let statuses: Vec<_> = seen.iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![StatusCode::Pending, StatusCode::Accepted]);
        assert_eq!(seen[1].tx_id.as_deref(), Some("TX-1"));
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (callback, seen) = recording();
        registry.subscribe(Topic::Invoice(7), callback, tx);
        let sub_id = subscribed_id(&mut rx);

        assert!(!dispatch_frame(&registry, message_for(&sub_id, "<<garbage>>")));
        assert!(seen.lock().expect("锁中毒").is_empty());
        assert!(registry.contains(Topic::Invoice(7)), "解码失败不应取消订阅");

        assert!(dispatch_frame(
            &registry,
            message_for(&sub_id, r#"{"invoiceId":7,"status":"FAILED","errorMessage":"timeout","timestamp":3}"#)
        ));
        assert_eq!(seen.lock().expect("锁中毒").len(), 1);
    }

    #[test]
    fn test_routing_by_destination_and_unknown_subscription() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (callback, seen) = recording();
        registry.subscribe(Topic::Company(3), callback, tx);

        let by_destination = StompFrame::new(StompCommand::Message)
            .header(headers::DESTINATION, "/topic/company/3/invoices")
            .body(r#"{"invoiceId":11,"status":"PROCESSING","timestamp":5}"#);
        assert!(dispatch_frame(&registry, by_destination));

        assert!(!dispatch_frame(
            &registry,
            message_for("sub-999", r#"{"invoiceId":11,"status":"PENDING","timestamp":6}"#)
        ));
        assert!(!dispatch_frame(
            &registry,
            StompFrame::new(StompCommand::Error).header(headers::MESSAGE, "boom")
        ));
        assert_eq!(seen.lock().expect("锁中毒").len(), 1);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (recorder, seen) = recording();
        let callback: StatusCallback = Arc::new(move |msg: StatusMessage| {
            if msg.timestamp == 1 {
                panic!("消费方处理失败");
            }
            recorder(msg);
        });
        registry.subscribe(Topic::Invoice(42), callback, tx);
        let sub_id = subscribed_id(&mut rx);

        assert!(!dispatch_frame(
            &registry,
            message_for(&sub_id, r#"{"invoiceId":42,"status":"PENDING","timestamp":1}"#)
        ));
        assert!(registry.contains(Topic::Invoice(42)), "回调 panic 不应取消订阅");
        assert!(dispatch_frame(
            &registry,
            message_for(&sub_id, r#"{"invoiceId":42,"status":"ACCEPTED","timestamp":2}"#)
        ));

        let seen = seen.lock().expect("锁中毒");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, StatusCode::Accepted);
    }
}
