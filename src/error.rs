//! 捕获核心错误类型
//!
//! - `Config` / `Spawn`：启动前的致命错误，直接报告给用户并以非零状态退出
//! - `Persistence`：落盘失败，只写诊断日志，不打断交互会话

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// 缺少必需的凭据或配置不可读
    #[error("{0}")]
    Config(String),

    /// 无法分配 PTY 或启动子进程
    #[error("failed to start `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    /// 原始日志或快照写入失败
    #[error("failed to write {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub fn spawn(program: &str, reason: impl ToString) -> Self {
        Self::Spawn {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// 是否为启动前的致命错误
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Persistence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_is_not_fatal() {
        let err = CaptureError::persistence(
            "MEMORY.md",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("MEMORY.md"));
    }

    #[test]
    fn test_spawn_error_message() {
        let err = CaptureError::spawn("claude", "not found in PATH");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "failed to start `claude`: not found in PATH");
    }
}
