//! 状态推送主题。
//!
//! 主题键 (`invoice/{id}/status`、`company/{id}/invoices`) 在订阅注册表中唯一；
//! 对应的 STOMP 目的地统一加 `/topic/` 前缀。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 推送端发布状态事件的频道前缀。
pub const TOPIC_PREFIX: &str = "/topic/";

/// 一条状态推送频道：单张发票，或某公司名下全部发票的聚合流。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Topic {
    /// `invoice/{invoiceId}/status`
    Invoice(i64),
    /// `company/{companyId}/invoices`
    Company(i64),
}

impl Topic {
    /// 注册表中使用的主题键，例如 `invoice/42/status`。
    pub fn key(&self) -> String {
        match self {
            Topic::Invoice(id) => format!("invoice/{}/status", id),
            Topic::Company(id) => format!("company/{}/invoices", id),
        }
    }

    /// 完整的 STOMP 目的地，例如 `/topic/invoice/42/status`。
    pub fn destination(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.key())
    }

    /// 从目的地或主题键反解析出主题；无法识别时返回 `None`。
    pub fn parse(raw: &str) -> Option<Topic> {
        let key = raw
            .strip_prefix(TOPIC_PREFIX)
            .or_else(|| raw.strip_prefix("topic/"))
            .unwrap_or(raw);
        let mut parts = key.split('/');
        let (kind, id, tail) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let id: i64 = id.parse().ok()?;
        match (kind, tail) {
            ("invoice", "status") => Some(Topic::Invoice(id)),
            ("company", "invoices") => Some(Topic::Company(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_keys_and_destinations() {
        assert_eq!(Topic::Invoice(42).key(), "invoice/42/status");
        assert_eq!(Topic::Company(7).key(), "company/7/invoices");
        assert_eq!(Topic::Invoice(42).destination(), "/topic/invoice/42/status");
        assert_eq!(Topic::Company(7).to_string(), "company/7/invoices");
    }

    #[test]
    fn test_parse_accepts_key_and_destination_forms() {
        assert_eq!(Topic::parse("/topic/invoice/42/status"), Some(Topic::Invoice(42)));
        assert_eq!(Topic::parse("topic/company/3/invoices"), Some(Topic::Company(3)));
        assert_eq!(Topic::parse("invoice/9/status"), Some(Topic::Invoice(9)));

        assert_eq!(Topic::parse("/topic/invoice/abc/status"), None);
        assert_eq!(Topic::parse("/topic/invoice/1/invoices"), None);
        assert_eq!(Topic::parse("/topic/invoice/1/status/extra"), None);
        assert_eq!(Topic::parse("/queue/other"), None);
    }

    #[test]
    /// 发票主题与公司主题即使 id 相同也是不同的键。
    fn test_topic_hash_distinguishes_kind() {
        let mut set = HashSet::new();
        set.insert(Topic::Invoice(1));
        set.insert(Topic::Invoice(1));
        set.insert(Topic::Company(1));
        assert_eq!(set.len(), 2);
    }
}
