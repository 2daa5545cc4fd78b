//! 启动器设置 - ~/.config/nexto-launcher/config.json
//!
//! 所有字段都有默认值，文件缺失或解析失败时使用默认设置。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// 启动器设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// 视为宿主的进程名（精确匹配）
    pub host_process_names: Vec<String>,
    /// Python 解释器，未设置时在 PATH 中查找
    pub python: Option<String>,
    /// 必需的 Python 包
    pub required_packages: Vec<String>,
    /// 除 bot.py / bot.cfg / requirements.txt 之外的必需文件（相对 bot 目录）
    pub extra_required_files: Vec<String>,
    /// 缺少依赖时自动安装
    pub auto_install: bool,
    pub host_wait_timeout_secs: u64,
    pub host_poll_interval_secs: u64,
    /// 检测到宿主后等待游戏加载完成
    pub host_settle_secs: u64,
    pub monitor_interval_secs: u64,
    /// 停止时等待外部进程退出的时间，超时后强制结束
    pub stop_grace_secs: u64,
    /// Direct 注入后观察进程是否立即失败的时间
    pub direct_confirm_secs: u64,
    pub match_attach_timeout_secs: f64,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            host_process_names: vec![
                "RocketLeague.exe".to_string(),
                "RLBot.exe".to_string(),
                "bakkesmod.exe".to_string(),
            ],
            python: None,
            required_packages: vec![
                "rlbot".to_string(),
                "torch".to_string(),
                "numpy".to_string(),
                "rlgym-compat".to_string(),
            ],
            extra_required_files: Vec::new(),
            auto_install: true,
            host_wait_timeout_secs: 300,
            host_poll_interval_secs: 2,
            host_settle_secs: 5,
            monitor_interval_secs: 5,
            stop_grace_secs: 10,
            direct_confirm_secs: 3,
            match_attach_timeout_secs: 30.0,
        }
    }
}

impl LauncherSettings {
    /// 默认设置文件路径
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nexto-launcher")
            .join("config.json")
    }

    /// 从默认路径加载
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// 从指定路径加载；缺失或无效时回退到默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No launcher settings file, using defaults");
            return Self::default();
        }

        match Self::read(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Invalid launcher settings, using defaults");
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn host_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.host_wait_timeout_secs)
    }

    pub fn host_poll_interval(&self) -> Duration {
        Duration::from_secs(self.host_poll_interval_secs.max(1))
    }

    pub fn host_settle(&self) -> Duration {
        Duration::from_secs(self.host_settle_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn direct_confirm(&self) -> Duration {
        Duration::from_secs(self.direct_confirm_secs)
    }
}
