//! 重试计数与退避
//!
//! 每个 workflow 独立计数；退避延迟 delay(n) = base * 2^(n-1)。
//! 只有瞬时错误（超时、网络、限流等）才适合自动重试。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 默认退避基数（毫秒）
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// 瞬时错误特征（小写匹配）
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "rate limit",
    "ratelimit",
    "temporarily unavailable",
    "service unavailable",
    "too many requests",
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "socket hang up",
];

/// 判断错误信息是否属于可重试的瞬时错误；其余一律视为永久错误
pub fn is_transient_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// 第 n 次重试前的退避时长：base * 2^(n-1)，n 从 1 开始
pub fn calculate_backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exp)
}

/// 重试计数器：workflow id -> 已重试次数
#[derive(Debug)]
pub struct RetryTracker {
    counts: Mutex<HashMap<String, u32>>,
    max_retries: u32,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn get(&self, id: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(id).copied().unwrap_or(0)
    }

    /// 计数加一并返回新值；超过上限后停在 max_retries + 1
    pub fn increment(&self, id: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(id.to_string()).or_insert(0);
        if *count <= self.max_retries {
            *count += 1;
        }
        *count
    }

    pub fn is_limit_reached(&self, id: &str) -> bool {
        self.get(id) > self.max_retries
    }

    pub fn clear(&self, id: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.remove(id);
    }

    pub fn clear_all(&self) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.clear();
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(1000);
        let delays: Vec<u128> = (1..=4)
            .map(|n| calculate_backoff_delay(n, base).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_backoff_custom_base() {
        let base = Duration::from_millis(250);
        assert_eq!(calculate_backoff_delay(1, base), Duration::from_millis(250));
        assert_eq!(calculate_backoff_delay(3, base), Duration::from_millis(1000));
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient_error("Request timeout after 30s"));
        assert!(is_transient_error("Network unreachable"));
        assert!(is_transient_error("Rate limit exceeded"));
        assert!(is_transient_error("connect ECONNREFUSED 127.0.0.1:443"));
        assert!(is_transient_error("503 Service Unavailable"));
        assert!(is_transient_error("429 Too Many Requests"));
        assert!(is_transient_error("TIMEOUT"));
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!is_transient_error("Invalid API key"));
        assert!(!is_transient_error("Schema validation failed"));
        assert!(!is_transient_error("Agent not found"));
    }

    #[test]
    fn test_limit_reached_at_max() {
        let tracker = RetryTracker::new(3);
        assert!(!tracker.is_limit_reached("wf-1"));
        assert_eq!(tracker.increment("wf-1"), 1);
        assert!(!tracker.is_limit_reached("wf-1"));
        assert_eq!(tracker.increment("wf-1"), 2);
        assert!(!tracker.is_limit_reached("wf-1"));
        assert_eq!(tracker.increment("wf-1"), 3);
        assert!(!tracker.is_limit_reached("wf-1"));
        assert_eq!(tracker.increment("wf-1"), 4);
        assert!(tracker.is_limit_reached("wf-1"));
    }

    #[test]
    fn test_count_stops_past_limit() {
        let tracker = RetryTracker::new(2);
        for _ in 0..5 {
            tracker.increment("wf-1");
        }
        assert_eq!(tracker.get("wf-1"), 3);
        assert_eq!(tracker.increment("wf-1"), 3);
    }

    #[test]
    fn test_clear_only_targeted() {
        let tracker = RetryTracker::default();
        tracker.increment("a");
        tracker.increment("a");
        tracker.increment("b");

        tracker.clear("a");
        assert_eq!(tracker.get("a"), 0);
        assert_eq!(tracker.get("b"), 1);

        tracker.clear_all();
        assert_eq!(tracker.get("b"), 0);
    }
}
