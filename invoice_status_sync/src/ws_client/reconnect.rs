// invoice_status_sync/src/ws_client/reconnect.rs

//! 重连策略：按尝试次数线性退避。

use std::time::Duration;

/// 第 n 次重连前等待 `base_delay × n`，最多尝试 `max_attempts` 次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// 第 `attempt` 次重连 (从 1 开始) 前的等待时间；超过上限时返回 `None`。
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = ReconnectPolicy::new(Duration::from_millis(5000), 3);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(5000)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(10_000)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(15_000)));
        assert_eq!(policy.delay_for(4), None, "超过最大次数后不应再安排重连");
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), 0);
        assert_eq!(policy.delay_for(1), None);
    }
}
