//! 快照文档渲染
//!
//! 快照是给人看的 Markdown，每次刷新整体覆盖。清理命令完成后会用
//! `CleanedDocument` 替换原始尾部。

use crate::capture::{tail, BufferSnapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// 没有任何可读内容时的占位
pub const EMPTY_PLACEHOLDER: &str = "(No conversation yet)";

/// 渲染快照所需的固定参数
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub tail_chars: usize,
    pub autosave_interval: Duration,
    /// 原始日志文件名
    pub raw_log_name: String,
}

/// 一次刷新请求：版本号、时间戳和当时的缓冲区内容
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// 同一会话内严格递增
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub buffer: BufferSnapshot,
}

/// 会话快照文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDocument {
    pub updated_at: DateTime<Utc>,
    pub captured_bytes: usize,
    pub clean_bytes: usize,
    pub recent: String,
    pub autosave_interval: Duration,
    pub raw_log_name: String,
}

impl SnapshotDocument {
    /// 从刷新请求构建（会清洗整个缓冲区，不要在交互路径上调用）
    pub fn build(request: &SnapshotRequest, options: &SnapshotOptions) -> Self {
        let clean = request.buffer.clean();
        Self {
            updated_at: request.updated_at,
            captured_bytes: request.buffer.len(),
            clean_bytes: clean.len(),
            recent: tail(&clean, options.tail_chars).to_string(),
            autosave_interval: options.autosave_interval,
            raw_log_name: options.raw_log_name.clone(),
        }
    }

    pub fn render(&self) -> String {
        let recent = if self.recent.is_empty() {
            EMPTY_PLACEHOLDER
        } else {
            self.recent.as_str()
        };

        format!(
            "# Empusa Session Log\n\
             \n\
             **Last Updated:** {updated}\n\
             **Captured:** {captured} bytes ({clean} clean)\n\
             \n\
             ## Recent Conversation (Raw)\n\
             \n\
             {recent}\n\
             \n\
             ## Status\n\
             - ✅ Auto-saving every {interval}\n\
             - ✅ Full session in {raw_log}\n\
             - 🎯 Run `empusa cleanup` to AI-clean this log\n\
             \n\
             ---\n\
             *Auto-updates while chatting*\n",
            updated = format_timestamp(&self.updated_at),
            captured = self.captured_bytes,
            clean = self.clean_bytes,
            recent = recent,
            interval = format_interval(self.autosave_interval),
            raw_log = self.raw_log_name,
        )
    }
}

/// AI 清理后的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedDocument {
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub conversation: String,
    pub raw_log_name: String,
}

impl CleanedDocument {
    pub fn render(&self) -> String {
        let updated = format_timestamp(&self.updated_at);
        format!(
            "# Empusa Session Log\n\
             \n\
             **Last Updated:** {updated}\n\
             **AI Cleaned:** ✅ {model}\n\
             \n\
             ## Conversation\n\
             \n\
             {conversation}\n\
             \n\
             ## Status\n\
             - ✅ AI cleanup complete ({updated})\n\
             - ✅ Full raw session in {raw_log}\n\
             \n\
             ---\n\
             *Cleaned by {model}*\n",
            updated = updated,
            model = self.model,
            conversation = self.conversation.trim(),
            raw_log = self.raw_log_name,
        )
    }
}

/// ISO-8601，毫秒精度
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_interval(interval: Duration) -> String {
    let ms = interval.as_millis();
    if ms == 1000 {
        "1 second".to_string()
    } else if ms % 1000 == 0 {
        format!("{} seconds", ms / 1000)
    } else {
        format!("{} ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options() -> SnapshotOptions {
        SnapshotOptions {
            tail_chars: 5,
            autosave_interval: Duration::from_secs(1),
            raw_log_name: ".empusa-session.log".to_string(),
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_build_counts_and_tail() {
        let request = SnapshotRequest {
            version: 1,
            updated_at: fixed_time(),
            buffer: BufferSnapshot {
                raw: b"\x1b[32mhello world\x1b[0m".to_vec(),
            },
        };

        let doc = SnapshotDocument::build(&request, &options());

        assert_eq!(doc.captured_bytes, request.buffer.len());
        assert_eq!(doc.clean_bytes, "hello world".len());
        assert_eq!(doc.recent, "world");
    }

    #[test]
    fn test_render_sections() {
        let request = SnapshotRequest {
            version: 1,
            updated_at: fixed_time(),
            buffer: BufferSnapshot::default(),
        };
        let rendered = SnapshotDocument::build(&request, &options()).render();

        assert!(rendered.starts_with("# Empusa Session Log\n"));
        assert!(rendered.contains("**Last Updated:** 2026-03-01T12:00:00.000Z"));
        assert!(rendered.contains("**Captured:** 0 bytes (0 clean)"));
        assert!(rendered.contains(EMPTY_PLACEHOLDER));
        assert!(rendered.contains("- ✅ Auto-saving every 1 second"));
        assert!(rendered.contains("- ✅ Full session in .empusa-session.log"));
    }

    #[test]
    fn test_render_cleaned() {
        let doc = CleanedDocument {
            updated_at: fixed_time(),
            model: "deepseek-ai/deepseek-v3".to_string(),
            conversation: "\nUser: hi\nClaude: hello\n".to_string(),
            raw_log_name: ".empusa-session.log".to_string(),
        };
        let rendered = doc.render();

        assert!(rendered.contains("**AI Cleaned:** ✅ deepseek-ai/deepseek-v3"));
        assert!(rendered.contains("## Conversation\n\nUser: hi\nClaude: hello\n"));
        assert!(rendered.contains("AI cleanup complete (2026-03-01T12:00:00.000Z)"));
        assert!(!rendered.contains("Recent Conversation"));
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(1)), "1 second");
        assert_eq!(format_interval(Duration::from_secs(5)), "5 seconds");
        assert_eq!(format_interval(Duration::from_millis(250)), "250 ms");
    }
}
