//! Empusa CLI
//!
//! 包装交互式 AI CLI，透明转发输入输出并保存完整会话

use anyhow::Result;
use clap::{Parser, Subcommand};
use empusa::cli::{CleanupArgs, RunArgs};
use empusa::diagnostics;

#[derive(Parser)]
#[command(name = "empusa")]
#[command(about = "Empusa - capture interactive AI CLI sessions into a durable transcript")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 在 PTY 中运行程序并保存会话
    Run(RunArgs),
    /// 用 AI 把上一次会话整理成对话
    Cleanup(CleanupArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => match empusa::cli::handle_run(args).await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("❌ {:#}", e);
                std::process::exit(1);
            }
        },
        Commands::Cleanup(args) => {
            if let Err(e) = diagnostics::init_stderr_logging() {
                eprintln!("⚠️  {:#}", e);
            }
            let result =
                tokio::task::spawn_blocking(move || empusa::cli::handle_cleanup(args)).await?;
            if let Err(e) = result {
                eprintln!("❌ {:#}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
