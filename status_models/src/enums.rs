//! 通用枚举模块。
//!
//! 定义发票核验状态码。状态码构成一个只用于提示的状态机：
//! `NOT_SENT → {PENDING, PROCESSING} → {ACCEPTED | REJECTED | FAILED}`。
//! 同步引擎本身不校验迁移是否合法，消费方才关心终态。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 发票提交到外部核验机构后的状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// 尚未提交。
    NotSent,
    /// 已提交，等待核验机构受理。
    Pending,
    /// 核验机构正在处理。
    Processing,
    /// 核验通过 (终态)。
    Accepted,
    /// 核验被拒绝 (终态)。
    Rejected,
    /// 提交失败 (终态)。
    Failed,
}

impl StatusCode {
    /// 全部状态码，按状态机顺序排列。
    pub const ALL: [StatusCode; 6] = [
        StatusCode::NotSent,
        StatusCode::Pending,
        StatusCode::Processing,
        StatusCode::Accepted,
        StatusCode::Rejected,
        StatusCode::Failed,
    ];

    /// 是否为终态 (`ACCEPTED`、`REJECTED`、`FAILED`)。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusCode::Accepted | StatusCode::Rejected | StatusCode::Failed
        )
    }

    /// 推送端使用的线上拼写。
    pub fn as_wire_str(self) -> &'static str {
        match self {
            StatusCode::NotSent => "NOT_SENT",
            StatusCode::Pending => "PENDING",
            StatusCode::Processing => "PROCESSING",
            StatusCode::Accepted => "ACCEPTED",
            StatusCode::Rejected => "REJECTED",
            StatusCode::Failed => "FAILED",
        }
    }

    /// 按提示性状态机判断 `self → next` 是否为预期迁移。
    ///
    /// 终态之后允许回到 `PENDING` / `PROCESSING`，对应重新提交；
    /// 相同状态的重复投递也视为合法。此函数仅供消费方参考，引擎不会据此丢弃消息。
    pub fn can_transition_to(self, next: StatusCode) -> bool {
        if self == next {
            return true;
        }
        match self {
            StatusCode::NotSent => matches!(next, StatusCode::Pending | StatusCode::Processing),
            StatusCode::Pending => next != StatusCode::NotSent,
            StatusCode::Processing => next.is_terminal(),
            StatusCode::Accepted | StatusCode::Rejected | StatusCode::Failed => {
                matches!(next, StatusCode::Pending | StatusCode::Processing)
            }
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// 解析未知状态码时返回的错误，携带原始文本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatusCode(pub String);

impl fmt::Display for UnknownStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知的发票状态码: '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatusCode {}

impl FromStr for StatusCode {
    type Err = UnknownStatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusCode::ALL
            .into_iter()
            .find(|code| code.as_wire_str() == s)
            .ok_or_else(|| UnknownStatusCode(s.to_string()))
    }
}
