//! Empusa - 透明 PTY 代理，把交互式 AI CLI 会话完整保存下来

pub mod ai;
pub mod capture;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod persistence;
pub mod proxy;

pub use capture::{sanitize, sanitize_str, should_flush, AutosaveGate, SessionBuffer};
pub use config::CaptureConfig;
pub use error::CaptureError;
pub use persistence::{SnapshotDocument, SnapshotWriter, TranscriptStore};
pub use proxy::{ProxyControls, ProxyIo, PtyProxy, SessionOutcome, SessionState};
