//! 会话状态 - 一次代理运行从启动到退出的全部可变状态
//!
//! 缓冲区、刷新时间、生命周期状态和退出码都挂在 `Session` 上，由代理独占。

use crate::capture::{AutosaveGate, SessionBuffer};
use crate::persistence::SnapshotRequest;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 代理生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Spawning,
    Running,
    Exiting,
    Terminated,
}

impl SessionState {
    /// 只允许按顺序前进一步
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Spawning, SessionState::Running)
                | (SessionState::Spawning, SessionState::Exiting)
                | (SessionState::Running, SessionState::Exiting)
                | (SessionState::Exiting, SessionState::Terminated)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Spawning => write!(f, "spawning"),
            SessionState::Running => write!(f, "running"),
            SessionState::Exiting => write!(f, "exiting"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    started_at: DateTime<Utc>,
    buffer: SessionBuffer,
    autosave: AutosaveGate,
    last_snapshot_at: Option<DateTime<Utc>>,
    snapshot_version: u64,
    state: SessionState,
    exit_code: Option<i32>,
    input_bytes: usize,
    output_bytes: usize,
}

impl Session {
    pub fn new(autosave_interval: Duration) -> Self {
        Self {
            started_at: Utc::now(),
            buffer: SessionBuffer::new(),
            autosave: AutosaveGate::new(autosave_interval),
            last_snapshot_at: None,
            snapshot_version: 0,
            state: SessionState::Spawning,
            exit_code: None,
            input_bytes: 0,
            output_bytes: 0,
        }
    }

    pub fn started_at(&self) -> &DateTime<Utc> {
        &self.started_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    pub fn input_bytes(&self) -> usize {
        self.input_bytes
    }

    pub fn output_bytes(&self) -> usize {
        self.output_bytes
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// 状态迁移，非法迁移返回 false 且不改变状态
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "Ignored session state transition");
            return false;
        }
        info!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
        true
    }

    /// 记录退出码，只有第一次生效
    pub fn set_exit_code(&mut self, code: i32) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        self.exit_code = Some(code);
        true
    }

    /// 记录子进程输出，需要刷新快照时返回刷新请求
    pub fn record_output(&mut self, chunk: &[u8], now: Instant) -> Option<SnapshotRequest> {
        self.buffer.append(chunk);
        self.output_bytes += chunk.len();
        if self.autosave.poll(now) {
            Some(self.snapshot_request())
        } else {
            None
        }
    }

    /// 先捕获用户输入，再交给 `forward` 转发
    ///
    /// 转发失败（子进程已退出等）不影响已捕获的内容。
    pub fn capture_then_forward<F, E>(&mut self, chunk: &[u8], forward: F) -> Result<(), E>
    where
        F: FnOnce(&[u8]) -> Result<(), E>,
    {
        self.buffer.append(chunk);
        self.input_bytes += chunk.len();
        forward(chunk)
    }

    /// 以当前缓冲区生成刷新请求，版本严格递增，时间戳单调不减
    pub fn snapshot_request(&mut self) -> SnapshotRequest {
        self.snapshot_version += 1;
        SnapshotRequest {
            version: self.snapshot_version,
            updated_at: self.next_snapshot_time(),
            buffer: self.buffer.snapshot(),
        }
    }

    fn next_snapshot_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_snapshot_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_snapshot_at = Some(ts);
        ts
    }
}
