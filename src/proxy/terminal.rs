//! 控制终端 - 尺寸读取与 raw 模式

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size as terminal_size};
use portable_pty::PtySize;
use std::io::IsTerminal;
use tracing::{debug, warn};

pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

pub fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// 读取控制终端尺寸，无法读取时使用 80x24
pub fn current_size() -> PtySize {
    match terminal_size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => pty_size(rows, cols),
        _ => pty_size(DEFAULT_ROWS, DEFAULT_COLS),
    }
}

/// 进入 raw 模式，drop 时恢复
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// stdin 不是终端时什么也不做
    pub fn enable() -> Self {
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal, raw mode skipped");
            return Self { enabled: false };
        }
        match enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                warn!(error = %e, "Failed to enable raw mode");
                Self { enabled: false }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 显式恢复终端模式
    pub fn restore(mut self) {
        self.disable();
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_size_is_never_zero() {
        let size = current_size();
        assert!(size.rows > 0);
        assert!(size.cols > 0);
    }
}
