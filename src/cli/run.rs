//! Run 命令 - 在 PTY 中运行程序并捕获会话

use crate::config::{load_dotenv, CaptureConfig};
use crate::diagnostics;
use crate::proxy::{
    current_size, signals, ProxyControls, ProxyIo, PtyProxy, RawModeGuard, SessionOutcome,
};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Run 命令参数
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// 被包装的程序（默认 claude）
    #[arg(long, short)]
    pub program: Option<String>,

    /// 自动保存间隔（毫秒）
    #[arg(long)]
    pub autosave_ms: Option<u64>,

    /// 快照文档路径
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// 原始会话日志路径
    #[arg(long)]
    pub session_log: Option<PathBuf>,

    /// 原样传给程序的参数（放在 `--` 之后）
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    /// 命令行参数覆盖配置
    pub fn apply(self, config: &mut CaptureConfig) {
        if let Some(program) = self.program {
            config.program = program;
        }
        if let Some(ms) = self.autosave_ms {
            config.autosave_interval = Duration::from_millis(ms);
        }
        if let Some(path) = self.snapshot {
            config.snapshot_path = path;
        }
        if let Some(path) = self.session_log {
            config.session_log = path;
        }
        if !self.args.is_empty() {
            config.args = self.args;
        }
    }
}

/// 处理 run 命令，返回进程退出码
pub async fn handle_run(args: RunArgs) -> Result<i32> {
    if let Ok(cwd) = std::env::current_dir() {
        load_dotenv(&cwd.join(".env"));
    }

    let mut config = CaptureConfig::load()?;
    args.apply(&mut config);

    let credential = prepare_session(&config, |key| std::env::var(key).ok())?;

    info!(
        program = %config.program,
        args = ?config.args,
        snapshot = %config.snapshot_path.display(),
        "Starting capture session"
    );
    let proxy = PtyProxy::spawn(&config, credential, current_size(), ProxyIo::stdio())?;
    let (handle, controls) = ProxyControls::channel();

    let raw_mode = RawModeGuard::enable();
    if let Err(e) = signals::install(handle) {
        warn!(error = %e, "Signal forwarding unavailable");
    }

    let outcome = proxy.run(controls).await;
    raw_mode.restore();

    report(&config, &outcome);
    Ok(outcome.exit_code)
}

/// 确认凭据后再打开诊断日志
///
/// 凭据缺失时直接返回错误，不创建任何文件，也不分配 PTY。
pub fn prepare_session<F>(config: &CaptureConfig, lookup: F) -> Result<Option<(String, String)>>
where
    F: Fn(&str) -> Option<String>,
{
    let credential = config.credential_from(lookup)?;
    if let Err(e) = diagnostics::init_file_logging(&config.debug_log) {
        eprintln!("⚠️  Diagnostics disabled: {:#}", e);
    }
    Ok(credential)
}

fn report(config: &CaptureConfig, outcome: &SessionOutcome) {
    if outcome.raw_log_saved {
        println!("\n💾 Session saved to {}", config.session_log.display());
        println!("🎯 Run: empusa cleanup (to AI-clean the log)");
    } else {
        eprintln!(
            "\n⚠️  Failed to save session to {} (see {})",
            config.session_log.display(),
            config.debug_log.display()
        );
    }
}
