//! 伪终端代理 - 启动子进程、双向转发、尺寸同步、信号处理、退出码传递

pub mod pty;
pub mod pump;
pub mod runner;
pub mod session;
pub mod signals;
pub mod terminal;

pub use pty::{ChildCommand, PtyProcess};
pub use pump::ProxyEvent;
pub use runner::{
    ProxyControlHandle, ProxyControls, ProxyIo, PtyProxy, SessionOutcome,
    INTERRUPT_TEARDOWN_TIMEOUT, OUTPUT_DRAIN_TIMEOUT,
};
pub use session::{Session, SessionState};
pub use terminal::{current_size, pty_size, RawModeGuard};
