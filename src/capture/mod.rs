//! 捕获核心 - 控制序列清洗、会话缓冲、自动保存节流

pub mod autosave;
pub mod buffer;
pub mod sanitizer;

pub use autosave::{should_flush, AutosaveGate, DEFAULT_AUTOSAVE_INTERVAL};
pub use buffer::{tail, BufferSnapshot, SessionBuffer};
pub use sanitizer::{sanitize, sanitize_str};
