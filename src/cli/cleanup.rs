//! Cleanup 命令 - 用 AI 整理上一次捕获的会话

use crate::ai::{save_cleaned, PreparedTranscript, ReplicateClient, ReplicateConfig};
use crate::config::{load_dotenv, CaptureConfig};
use crate::persistence::TranscriptStore;
use anyhow::Result;
use clap::Args;
use std::io::Write;

/// Cleanup 命令参数
#[derive(Args, Debug, Default)]
pub struct CleanupArgs {
    /// Replicate 模型（默认 deepseek-ai/deepseek-v3）
    #[arg(long, short)]
    pub model: Option<String>,
}

/// 处理 cleanup 命令（阻塞，会轮询远端）
pub fn handle_cleanup(args: CleanupArgs) -> Result<()> {
    if let Ok(cwd) = std::env::current_dir() {
        load_dotenv(&cwd.join(".env"));
    }

    let config = CaptureConfig::load()?;
    let store = TranscriptStore::new(config.session_log.clone(), config.snapshot_path.clone());

    println!("🧹 Cleaning up session with AI...\n");
    let transcript = PreparedTranscript::load(&store)?;
    println!("📊 Raw: {} bytes", transcript.raw_bytes);
    println!("📊 Clean: {} bytes\n", transcript.clean_bytes());

    let mut replicate = ReplicateConfig::auto_load()?;
    if let Some(model) = args.model {
        replicate.model = model;
    }
    let client = ReplicateClient::new(replicate)?;

    println!("🤖 Sending to {}...", client.model());
    let conversation = client.complete_with_progress(&transcript.prompt(), |_| {
        print!(".");
        let _ = std::io::stdout().flush();
    })?;

    println!("\n\n✅ AI Cleanup Complete!\n");
    println!("{}", "─".repeat(60));
    println!("{}", conversation);
    println!("{}", "─".repeat(60));

    save_cleaned(&store, client.model(), &conversation, &config.session_log_name())?;
    println!("\n💾 Saved to {}", store.snapshot_path().display());
    Ok(())
}
