//! 代理主循环
//!
//! 启动子进程后，由一个 `select!` 循环统一处理：
//! - 转发线程送来的输出、输入和退出事件
//! - 窗口尺寸变化
//! - 用户中断
//!
//! 会话状态只在这个循环里修改，快照写入交给后台任务。

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::persistence::{SnapshotDocument, SnapshotOptions, SnapshotWriter, TranscriptStore};
use crate::proxy::pty::{ChildCommand, PtyProcess};
use crate::proxy::pump::{
    spawn_exit_watcher, spawn_input_forwarder, spawn_input_pump, spawn_output_pump, ProxyEvent,
};
use crate::proxy::session::{Session, SessionState};
use portable_pty::{ChildKiller, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 子进程退出后继续读取残余输出的时间
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// 中断后等待子进程退出的时间
pub const INTERRUPT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// 代理两端的真实终端
pub struct ProxyIo {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl ProxyIo {
    pub fn stdio() -> Self {
        Self {
            input: Box::new(std::io::stdin()),
            output: Box::new(std::io::stdout()),
        }
    }
}

/// 运行期控制：窗口尺寸变化、中断
pub struct ProxyControls {
    resize: mpsc::UnboundedReceiver<PtySize>,
    interrupt: mpsc::UnboundedReceiver<()>,
}

/// 控制通道的发送端，可以交给信号处理任务
#[derive(Clone)]
pub struct ProxyControlHandle {
    resize: mpsc::UnboundedSender<PtySize>,
    interrupt: mpsc::UnboundedSender<()>,
}

impl ProxyControls {
    pub fn channel() -> (ProxyControlHandle, ProxyControls) {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        (
            ProxyControlHandle {
                resize: resize_tx,
                interrupt: interrupt_tx,
            },
            ProxyControls {
                resize: resize_rx,
                interrupt: interrupt_rx,
            },
        )
    }
}

impl ProxyControlHandle {
    /// 代理已结束时返回 false
    pub fn resize(&self, size: PtySize) -> bool {
        self.resize.send(size).is_ok()
    }

    pub fn interrupt(&self) -> bool {
        self.interrupt.send(()).is_ok()
    }
}

/// 一次会话的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// 本进程应使用的退出码
    pub exit_code: i32,
    /// 子进程自己的退出码（超时未退出时为 None）
    pub child_exit_code: Option<i32>,
    pub interrupted: bool,
    pub captured_bytes: usize,
    pub raw_log_saved: bool,
    pub snapshots_written: usize,
}

pub struct PtyProxy {
    session: Session,
    process: PtyProcess,
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    events: mpsc::UnboundedReceiver<ProxyEvent>,
    input_tx: Option<std_mpsc::Sender<Vec<u8>>>,
    store: Arc<TranscriptStore>,
    options: SnapshotOptions,
}

impl PtyProxy {
    /// 分配 PTY、启动子进程并开始转发
    ///
    /// 凭据检查由调用方在此之前完成。
    pub fn spawn(
        config: &CaptureConfig,
        credential: Option<(String, String)>,
        size: PtySize,
        io: ProxyIo,
    ) -> Result<Self, CaptureError> {
        let mut session = Session::new(config.autosave_interval);
        let command = ChildCommand::from_config(config, credential);
        let mut process = PtyProcess::spawn(&command, size)?;

        let program = config.program.as_str();
        let thread_err = |e: std::io::Error| CaptureError::spawn(program, e);

        let reader = process.reader()?;
        let writer = process.writer()?;
        let killer = process.killer();
        let child = process
            .take_child()
            .ok_or_else(|| CaptureError::spawn(program, "child handle already taken"))?;

        let (events_tx, events) = mpsc::unbounded_channel();
        spawn_output_pump(reader, io.output, events_tx.clone()).map_err(thread_err)?;
        spawn_input_pump(io.input, events_tx.clone()).map_err(thread_err)?;
        spawn_exit_watcher(child, events_tx).map_err(thread_err)?;

        let (input_tx, input_rx) = std_mpsc::channel();
        spawn_input_forwarder(writer, input_rx).map_err(thread_err)?;

        session.transition(SessionState::Running);

        Ok(Self {
            session,
            process,
            killer,
            events,
            input_tx: Some(input_tx),
            store: Arc::new(TranscriptStore::new(
                config.session_log.clone(),
                config.snapshot_path.clone(),
            )),
            options: SnapshotOptions {
                tail_chars: config.tail_chars,
                autosave_interval: config.autosave_interval,
                raw_log_name: config.session_log_name(),
            },
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// 运行到子进程退出（或中断后超时），然后做最后一次落盘
    pub async fn run(mut self, mut controls: ProxyControls) -> SessionOutcome {
        let writer = SnapshotWriter::spawn(Arc::clone(&self.store), self.options.clone());
        writer.submit(self.session.snapshot_request());

        let mut interrupted = false;
        let mut child_exit: Option<i32> = None;
        let mut output_closed = false;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            if child_exit.is_some() && output_closed {
                break;
            }
            let teardown_at = deadline.unwrap_or_else(tokio::time::Instant::now);

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(ProxyEvent::Output(chunk)) => {
                        if let Some(request) = self.session.record_output(&chunk, Instant::now()) {
                            writer.submit(request);
                        }
                    }
                    Some(ProxyEvent::OutputClosed) => {
                        debug!("Child output closed");
                        output_closed = true;
                    }
                    Some(ProxyEvent::Input(chunk)) => self.forward_input(&chunk),
                    Some(ProxyEvent::InputClosed) => debug!("Terminal input closed"),
                    Some(ProxyEvent::Exited(code)) => {
                        info!(code, "Child exited");
                        child_exit = Some(code);
                        self.session.transition(SessionState::Exiting);
                        // 子进程已退出，关闭写端
                        self.input_tx = None;
                        let drain = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
                        deadline = Some(deadline.map_or(drain, |d| d.min(drain)));
                    }
                    None => break,
                },
                Some(size) = controls.resize.recv() => {
                    match self.process.resize(size) {
                        Ok(()) => debug!(rows = size.rows, cols = size.cols, "PTY resized"),
                        Err(e) => warn!(error = %e, "PTY resize failed"),
                    }
                }
                Some(()) = controls.interrupt.recv(), if !interrupted => {
                    info!("Interrupt received, stopping child");
                    interrupted = true;
                    self.session.transition(SessionState::Exiting);
                    self.kill_child();
                    let teardown = tokio::time::Instant::now() + INTERRUPT_TEARDOWN_TIMEOUT;
                    deadline = Some(deadline.map_or(teardown, |d| d.min(teardown)));
                }
                _ = tokio::time::sleep_until(teardown_at), if deadline.is_some() => {
                    if child_exit.is_none() {
                        warn!("Child did not exit in time");
                        self.kill_child();
                    } else {
                        debug!("Output drain window elapsed");
                    }
                    break;
                }
            }
        }

        self.finish(writer, child_exit, interrupted).await
    }

    /// 先记录再转发，转发失败时输入仍然留在会话中
    fn forward_input(&mut self, chunk: &[u8]) {
        let tx = self.input_tx.as_ref();
        let forwarded = self.session.capture_then_forward(chunk, |bytes| match tx {
            Some(tx) => tx.send(bytes.to_vec()).map_err(|_| "forwarder stopped"),
            None => Err("child exited"),
        });
        if let Err(reason) = forwarded {
            debug!(bytes = chunk.len(), reason, "Input captured but not forwarded");
        }
    }

    fn kill_child(&mut self) {
        if let Some(killer) = self.killer.as_mut() {
            if let Err(e) = killer.kill() {
                debug!(error = %e, "Kill child failed");
            }
        }
    }

    async fn finish(
        mut self,
        writer: SnapshotWriter,
        child_exit: Option<i32>,
        interrupted: bool,
    ) -> SessionOutcome {
        self.input_tx = None;
        // 等后台写入结束（有上限）
        let mut snapshots_written = writer.shutdown().await;

        let raw_log_saved = match self
            .store
            .append_raw_log(self.session.started_at(), self.session.buffer().raw())
        {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to save raw session log");
                false
            }
        };

        let request = self.session.snapshot_request();
        let document = SnapshotDocument::build(&request, &self.options);
        // 超时后仍在写的旧请求版本更低，不会覆盖这一份
        match self
            .store
            .write_snapshot_versioned(request.version, &document.render())
        {
            Ok(true) => snapshots_written += 1,
            Ok(false) => debug!("Final snapshot superseded"),
            Err(e) => warn!(error = %e, "Final snapshot write failed"),
        }

        let exit_code = if interrupted {
            0
        } else {
            child_exit.unwrap_or(1)
        };
        self.session.set_exit_code(exit_code);
        self.session.transition(SessionState::Exiting);
        self.session.transition(SessionState::Terminated);

        let outcome = SessionOutcome {
            exit_code,
            child_exit_code: child_exit,
            interrupted,
            captured_bytes: self.session.buffer().len(),
            raw_log_saved,
            snapshots_written,
        };
        info!(
            exit_code,
            interrupted,
            input_bytes = self.session.input_bytes(),
            output_bytes = self.session.output_bytes(),
            snapshots = snapshots_written,
            "Session finished"
        );
        outcome
    }
}
