//! AI 整理 - Replicate 客户端和会话整理流程

pub mod cleanup;
pub mod client;

pub use cleanup::{build_prompt, save_cleaned, PreparedTranscript, PROMPT_TAIL_CHARS};
pub use client::{Prediction, ReplicateClient, ReplicateConfig};
