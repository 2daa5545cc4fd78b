//! Nexto Bot Loader CLI
//!
//! 把 Nexto bot 注入正在运行的 Rocket League（通过 RLBot）

use anyhow::Result;
use clap::{Parser, Subcommand};
use nexto_launcher::cli::{handle_launch, handle_processes, LaunchArgs};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "nexto-loader")]
#[command(about = "Nexto Bot Loader - 将 Nexto bot 注入 Rocket League (RLBot)")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    launch: LaunchArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出正在运行的宿主进程 (Rocket League / RLBot)
    Processes {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 启动器设置文件
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

/// 初始化日志：stderr，以及可选的日志文件
fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nexto_launcher=info,nexto_loader=info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    // 日志文件打不开时只输出到 stderr
    let file_layer = log_file
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
        .map(|file| {
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Processes { json, settings }) => {
            init_tracing(None);
            handle_processes(json, settings.as_deref())?;
        }
        None => {
            init_tracing(Some(&cli.launch.log_file()));
            let success = match handle_launch(cli.launch).await {
                Ok(success) => success,
                Err(e) => {
                    error!(error = %e, "Launcher error");
                    false
                }
            };
            if !success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
