//! 在 PTY 中启动子进程

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use anyhow::{anyhow, Result};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::info;

/// 子进程启动参数
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    /// 在继承的环境之上追加的变量
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ChildCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 按配置构建：TERM、强制彩色输出，以及显式透传凭据
    pub fn from_config(config: &CaptureConfig, credential: Option<(String, String)>) -> Self {
        let mut command = Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: vec![
                ("TERM".to_string(), config.term.clone()),
                ("FORCE_COLOR".to_string(), "1".to_string()),
            ],
            cwd: std::env::current_dir().ok(),
        };
        if let Some((key, value)) = credential {
            command.env.push((key, value));
        }
        command
    }

    fn builder(&self, program: &std::path::Path) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(program);
        cmd.args(&self.args);

        // 不设置 cwd 时 portable-pty 会使用 home 目录
        let cwd = self
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok());
        if let Some(cwd) = cwd {
            cmd.cwd(cwd);
        }

        for (key, value) in std::env::vars_os() {
            cmd.env(key, value);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// 已启动的 PTY 子进程
pub struct PtyProcess {
    program: String,
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl PtyProcess {
    pub fn spawn(command: &ChildCommand, size: PtySize) -> Result<Self, CaptureError> {
        let program = &command.program;
        let resolved = which::which(program).map_err(|e| CaptureError::spawn(program, e))?;

        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| CaptureError::spawn(program, format!("cannot open pty: {}", e)))?;

        let child = pair
            .slave
            .spawn_command(command.builder(&resolved))
            .map_err(|e| CaptureError::spawn(program, e))?;
        // 父进程必须释放 slave 端，否则子进程退出后读端收不到 EOF
        drop(pair.slave);

        let pid = child.process_id();
        info!(
            program = %resolved.display(),
            pid = ?pid,
            rows = size.rows,
            cols = size.cols,
            "PTY spawned"
        );

        Ok(Self {
            program: program.clone(),
            master: pair.master,
            child: Some(child),
            pid,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn reader(&self) -> Result<Box<dyn Read + Send>, CaptureError> {
        self.master
            .try_clone_reader()
            .map_err(|e| CaptureError::spawn(&self.program, format!("cannot read pty: {}", e)))
    }

    /// 只能调用一次
    pub fn writer(&self) -> Result<Box<dyn Write + Send>, CaptureError> {
        self.master
            .take_writer()
            .map_err(|e| CaptureError::spawn(&self.program, format!("cannot write pty: {}", e)))
    }

    /// 取出子进程句柄交给等待线程
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    pub fn killer(&self) -> Option<Box<dyn ChildKiller + Send + Sync>> {
        self.child.as_ref().map(|child| child.clone_killer())
    }

    pub fn resize(&self, size: PtySize) -> Result<()> {
        self.master
            .resize(size)
            .map_err(|e| anyhow!("resize to {}x{} failed: {}", size.cols, size.rows, e))
    }

    pub fn size(&self) -> Result<PtySize> {
        self.master
            .get_size()
            .map_err(|e| anyhow!("cannot read pty size: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::terminal::pty_size;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let command = ChildCommand::new("empusa-definitely-not-installed");
        let err = PtyProcess::spawn(&command, pty_size(24, 80)).err().unwrap();
        assert!(matches!(err, CaptureError::Spawn { .. }));
    }

    #[test]
    fn test_from_config_passes_credential() {
        let config = CaptureConfig::default();
        let command = ChildCommand::from_config(
            &config,
            Some(("CLAUDE_CODE_OAUTH_TOKEN".to_string(), "secret".to_string())),
        );
        assert_eq!(command.program, "claude");
        assert!(command.env.contains(&("FORCE_COLOR".to_string(), "1".to_string())));
        assert!(command.env.contains(&("TERM".to_string(), "xterm-256color".to_string())));
        assert!(command
            .env
            .contains(&("CLAUDE_CODE_OAUTH_TOKEN".to_string(), "secret".to_string())));
    }

    #[test]
    fn test_resize_updates_pty_geometry() {
        let command = ChildCommand::new("sh").arg("-c").arg("sleep 5");
        let mut process = PtyProcess::spawn(&command, pty_size(24, 80)).unwrap();
        assert_eq!(process.size().unwrap().rows, 24);

        process.resize(pty_size(50, 132)).unwrap();

        let size = process.size().unwrap();
        assert_eq!((size.rows, size.cols), (50, 132));

        let mut child = process.take_child().unwrap();
        child.kill().unwrap();
        let _ = child.wait();
    }
}
