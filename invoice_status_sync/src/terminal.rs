// invoice_status_sync/src/terminal.rs

//! 终态通知去重。
//!
//! 每张发票记住最近一次观察到的状态；只有在首次到达某个终态
//! (ACCEPTED / REJECTED / FAILED) 时才报告，重复投递的同一终态被抑制。

use status_models::{StatusCode, StatusMessage};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TerminalStatusTracker {
    last_seen: HashMap<i64, StatusCode>,
}

impl TerminalStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条状态事件；如果它让发票新到达一个终态，返回该终态。
    pub fn observe(&mut self, message: &StatusMessage) -> Option<StatusCode> {
        let previous = self.last_seen.insert(message.invoice_id, message.status);
        if message.status.is_terminal() && previous != Some(message.status) {
            Some(message.status)
        } else {
            None
        }
    }

    pub fn last_status(&self, invoice_id: i64) -> Option<StatusCode> {
        self.last_seen.get(&invoice_id).copied()
    }

    pub fn forget(&mut self, invoice_id: i64) {
        self.last_seen.remove(&invoice_id);
    }
}
