// status_models/src/ws_payloads.rs

//! 状态推送的消息负载定义。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::StatusCode;

/// 推送端在状态频道上发布的一条核验状态事件 (不落库)。
///
/// 线上 JSON 形如：
/// `{ "invoiceId": 42, "status": "ACCEPTED", "txId": "TX-1", "timestamp": 2000 }`。
/// `invoiceId`、`status`、`timestamp` 为必填字段，缺失即视为格式错误。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    /// 发票 ID。
    pub invoice_id: i64,
    /// 当前状态。
    pub status: StatusCode,
    /// 核验机构返回的交易号，仅在受理后出现。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// 被拒绝或失败时的原因描述。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 事件时间 (Unix 纪元毫秒)。
    pub timestamp: i64,
}

impl StatusMessage {
    /// 以当前时间构造一条状态事件，主要供推送模拟端和测试使用。
    pub fn now(invoice_id: i64, status: StatusCode) -> Self {
        Self {
            invoice_id,
            status,
            tx_id: None,
            error_message: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// 把毫秒时间戳转换为 UTC 时间；超出范围时返回 `None`。
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// 是否已到达终态。
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
