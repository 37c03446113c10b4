//! 信号转发
//!
//! SIGWINCH 转成 PTY 尺寸更新，Ctrl-C / SIGTERM / SIGHUP 转成中断请求。
//! raw 模式下 Ctrl-C 是普通输入字节，会直接转发给子进程；这里处理的是
//! 从外部发给本进程的信号。

use crate::proxy::runner::ProxyControlHandle;
use crate::proxy::terminal::current_size;
use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

/// 注册信号处理任务，代理结束（控制通道关闭）后任务自行退出
pub fn install(handle: ProxyControlHandle) -> Result<()> {
    let mut winch =
        signal(SignalKind::window_change()).context("Failed to listen for SIGWINCH")?;
    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;

    tokio::spawn(async move {
        loop {
            let delivered = tokio::select! {
                _ = winch.recv() => {
                    let size = current_size();
                    debug!(rows = size.rows, cols = size.cols, "Terminal resized");
                    handle.resize(size)
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("SIGINT received");
                    handle.interrupt()
                }
                _ = term.recv() => {
                    info!("SIGTERM received");
                    handle.interrupt()
                }
                _ = hangup.recv() => {
                    info!("SIGHUP received");
                    handle.interrupt()
                }
            };
            if !delivered {
                break;
            }
        }
    });

    Ok(())
}
