//! 诊断日志初始化
//!
//! 通过 RUST_LOG 控制日志级别，默认为 `empusa=info`。
//! `run` 期间终端属于子进程，日志只能写文件；其余命令写 stderr。

use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "empusa=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 日志追加到诊断文件
pub fn init_file_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open debug log {}", path.display()))?;

    fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_env_filter(filter())
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to init logging: {}", e))
}

/// 日志写到 stderr
pub fn init_stderr_logging() -> Result<()> {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter())
        .with_target(false)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to init logging: {}", e))
}
