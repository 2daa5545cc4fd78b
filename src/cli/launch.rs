// src/cli/launch.rs
//! Launch 命令 - 加载 bot 配置并执行注入流程
//!
//! 启动成功后一直运行到 Ctrl+C，再停止监控和外部进程。

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::descriptor::LaunchMode;
use crate::error::LaunchError;
use crate::events::{EventSink, TracingSink};
use crate::orchestrator::{Collaborators, Orchestrator, StartOptions};
use crate::profile::{ConfigStore, ConfigValue, Team, PROFILE_FILE_NAME};
use crate::settings::LauncherSettings;

/// 日志文件名，写在 bot 目录下
pub const LOG_FILE_NAME: &str = "nexto_loader.log";

/// Launch 参数
#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    /// bot 目录（包含 bot.cfg 和 bot.py）
    #[arg(long, default_value = ".")]
    pub bot_path: PathBuf,

    /// 不等待 Rocket League 启动
    #[arg(long)]
    pub no_wait: bool,

    /// 直接使用 RLBot GUI
    #[arg(long)]
    pub use_gui: bool,

    /// 队伍: 0 = Blue, 1 = Orange
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub team: Option<u8>,

    /// 附加到在线比赛（仅支持允许 bot 的自定义/私人比赛）
    #[arg(long)]
    pub online: bool,

    /// 缺少依赖时不自动安装
    #[arg(long)]
    pub no_install: bool,

    /// 把 --team 写回 bot.cfg
    #[arg(long, requires = "team")]
    pub save_team: bool,

    /// 启动器设置文件（默认: <config_dir>/nexto-launcher/config.json）
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl LaunchArgs {
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            wait_for_host: !self.no_wait,
            prefer_gui: self.use_gui,
            mode: if self.online {
                LaunchMode::OnlineAttach
            } else {
                LaunchMode::Exhibition
            },
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.bot_path.join(LOG_FILE_NAME)
    }

    pub fn load_settings(&self) -> LauncherSettings {
        let mut settings = self
            .settings
            .as_deref()
            .map(LauncherSettings::load_from)
            .unwrap_or_else(LauncherSettings::load);
        if self.no_install {
            settings.auto_install = false;
        }
        settings
    }
}

/// bot.cfg 中 team 所在的段
const TEAM_SECTION: &str = "Details";

/// 把队伍写回 bot.cfg；文件里没有 team 行时追加到 `[Details]`
pub fn save_team(store: &ConfigStore, profile_path: &Path, team: Team) -> bool {
    let changes = BTreeMap::from([("team".to_string(), ConfigValue::from(i64::from(team.index())))]);
    let saved = store.upsert(profile_path, TEAM_SECTION, &changes);
    if !saved {
        warn!(path = %profile_path.display(), %team, "Failed to save team to profile");
    }
    saved
}

/// 处理 launch；返回是否成功
pub async fn handle_launch(args: LaunchArgs) -> Result<bool> {
    let bot_dir = std::path::absolute(&args.bot_path)
        .with_context(|| format!("invalid bot path: {}", args.bot_path.display()))?;
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let settings = args.load_settings();

    let store = ConfigStore::new(events.clone());
    let profile_path = bot_dir.join(PROFILE_FILE_NAME);
    let profile = store.load(&profile_path);

    let collaborators = Collaborators::system(&settings, &profile, events.clone())?;
    let mut orchestrator = Orchestrator::new(profile, settings, collaborators);

    if let Some(team) = args.team.and_then(|t| Team::from_index(i64::from(t))) {
        orchestrator.set_team(team)?;
        if args.save_team {
            save_team(&store, &profile_path, team);
        }
    }

    let stop = orchestrator.stop_handle();
    let interrupt = tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, stopping bot...");
                stop.request_stop();
            }
        }
    });

    let success = match orchestrator.start(args.start_options()).await {
        Ok(strategy) => {
            info!(%strategy, "Nexto bot is running. Press Ctrl+C to stop.");
            stop.stopped().await;
            orchestrator.stop().await;
            true
        }
        Err(LaunchError::Cancelled) => {
            info!("Launch cancelled before the bot was injected");
            false
        }
        // 失败原因已经通过事件输出
        Err(_) => false,
    };

    interrupt.abort();
    Ok(success)
}
