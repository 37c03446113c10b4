//! 自动保存节流 - 决定收到新输出时是否需要刷新快照
//!
//! 不使用定时器：只有新输出到达时才判断，空闲期间快照可能过时，
//! 原始日志在会话结束时仍会完整写入。

use std::time::{Duration, Instant};

/// 默认刷新间隔
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(1);

/// 是否应该立即刷新
///
/// 尚未刷新过（会话第一段输出）时立即刷新，之后每个间隔至多一次。
pub fn should_flush(now: Instant, last_flush: Option<Instant>, interval: Duration) -> bool {
    match last_flush {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

/// 单个会话的刷新闸门
#[derive(Debug, Clone)]
pub struct AutosaveGate {
    interval: Duration,
    last_flush: Option<Instant>,
}

impl AutosaveGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    /// 判断并在需要刷新时记录刷新时间
    pub fn poll(&mut self, now: Instant) -> bool {
        if should_flush(now, self.last_flush, self.interval) {
            self.last_flush = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for AutosaveGate {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_INTERVAL)
    }
}
