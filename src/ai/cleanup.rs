//! 会话整理 - 把清洗后的原始日志交给模型整理成对话

use crate::capture::{sanitize, tail};
use crate::persistence::{CleanedDocument, TranscriptStore};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

/// 发给模型的尾部字符数
pub const PROMPT_TAIL_CHARS: usize = 4000;

/// 构造整理 prompt，只带最近的一段
pub fn build_prompt(clean: &str) -> String {
    format!(
        "You are a conversation formatter. Extract and format this CLI session into a clean, readable conversation.

RAW SESSION LOG:
{}

INSTRUCTIONS:
- Extract the actual conversation between user and Claude
- Format each exchange as:
  User: [what the user typed/asked]
  Claude: [Claude's response]
- Remove ALL UI elements: boxes, spinners, status messages, \"thinking\" indicators, prompts (>), escape codes
- If you see text that looks like a user question/command, label it \"User:\"
- If you see Claude's response text, label it \"Claude:\"
- Keep it concise and readable
- Output ONLY the formatted conversation, nothing else",
        tail(clean, PROMPT_TAIL_CHARS)
    )
}

/// 读取并清洗后的原始日志
#[derive(Debug, Clone)]
pub struct PreparedTranscript {
    pub raw_bytes: usize,
    pub clean: String,
}

impl PreparedTranscript {
    pub fn from_raw(raw: &[u8]) -> Self {
        Self {
            raw_bytes: raw.len(),
            clean: sanitize(raw),
        }
    }

    pub fn load(store: &TranscriptStore) -> Result<Self> {
        let raw = store
            .read_raw_log()
            .with_context(|| format!("No session log at {}", store.session_log().display()))?;
        Ok(Self::from_raw(&raw))
    }

    pub fn clean_bytes(&self) -> usize {
        self.clean.len()
    }

    pub fn prompt(&self) -> String {
        build_prompt(&self.clean)
    }
}

/// 用整理后的对话覆盖快照文档
pub fn save_cleaned(
    store: &TranscriptStore,
    model: &str,
    conversation: &str,
    raw_log_name: &str,
) -> Result<CleanedDocument> {
    let document = CleanedDocument {
        updated_at: Utc::now(),
        model: model.to_string(),
        conversation: conversation.to_string(),
        raw_log_name: raw_log_name.to_string(),
    };
    store
        .write_snapshot(&document.render())
        .context("Failed to save cleaned conversation")?;
    info!(path = %store.snapshot_path().display(), model, "Cleaned conversation saved");
    Ok(document)
}
