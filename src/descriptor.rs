//! 描述文件生成 - 把 BotProfile 渲染成 RLBot 读取的 JSON 配置
//!
//! 两种形态：
//! - Exhibition：完整比赛配置（队伍外观、地图、赛制、mutators）
//! - OnlineAttach：只有 bot 和启动器配置，附加到已有比赛

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::LaunchError;
use crate::events::{EventSink, LaunchEvent};
use crate::profile::BotProfile;

/// 描述文件名（固定，位于 bot 目录）
pub const DESCRIPTOR_FILE_NAME: &str = "nexto_rlbot_config.json";

/// 启动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// 本地完全受控的比赛
    #[default]
    Exhibition,
    /// 附加到已在进行的比赛（仅支持允许 bot 的自定义/私人比赛）
    OnlineAttach,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Exhibition => write!(f, "exhibition"),
            LaunchMode::OnlineAttach => write!(f, "online"),
        }
    }
}

/// 队伍外观
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamConfiguration {
    pub team_color_id: u32,
    pub custom_color_id: u32,
    pub car_id: u32,
    pub decal_id: u32,
    pub wheels_id: u32,
    pub boost_id: u32,
    pub antenna_id: u32,
    pub hat_id: u32,
    pub paint_finish_id: u32,
    pub custom_finish_id: u32,
    pub engine_audio_id: u32,
    pub trails_id: u32,
    pub goal_explosion_id: u32,
}

/// bot 条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub name: String,
    pub team: u8,
    pub python_file: String,
    pub config_file: String,
    /// logo 不存在时为空字符串
    pub logo_file: String,
    pub requirements_file: String,
    pub maximum_tick_rate_preference: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutators {
    pub match_length: String,
    pub max_score: String,
    pub overtime: String,
    pub series_length: String,
    pub game_speed: String,
    pub ball_max_speed: String,
    pub ball_type: String,
    pub ball_weight: String,
    pub ball_size: String,
    pub ball_bounciness: String,
    pub boost_amount: String,
    pub rumble: String,
    pub boost_strength: String,
    pub gravity: String,
    pub demolish: String,
    pub respawn_time: String,
}

impl Default for Mutators {
    fn default() -> Self {
        let default = || "Default".to_string();
        Self {
            match_length: "5 Minutes".to_string(),
            max_score: "Unlimited".to_string(),
            overtime: "Unlimited".to_string(),
            series_length: "Unlimited".to_string(),
            game_speed: default(),
            ball_max_speed: default(),
            ball_type: default(),
            ball_weight: default(),
            ball_size: default(),
            ball_bounciness: default(),
            boost_amount: default(),
            rumble: "None".to_string(),
            boost_strength: "1x".to_string(),
            gravity: default(),
            demolish: default(),
            respawn_time: "3 Seconds".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfiguration {
    pub game_mode: String,
    pub game_map: String,
    pub skip_replays: bool,
    pub instant_start: bool,
    pub existing_match_behavior: String,
    pub mutators: Mutators,
}

impl Default for MatchConfiguration {
    fn default() -> Self {
        Self {
            game_mode: "Soccer".to_string(),
            game_map: "DFHStadium".to_string(),
            skip_replays: false,
            instant_start: false,
            existing_match_behavior: "Continue_And_Spawn".to_string(),
            mutators: Mutators::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfiguration {
    pub launcher_car_id: u32,
    pub launcher_team: u8,
    pub launcher_primary_color: u32,
    pub launcher_secondary_color: u32,
    pub auto_save_replay: bool,
    pub enable_rendering: bool,
    pub enable_state_setting: bool,
    pub auto_start_bots: bool,
    pub look_for_custom_maps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_attach_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_match_attachment: Option<bool>,
}

/// 完整描述文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_configurations: Option<Vec<TeamConfiguration>>,
    pub bot_configurations: Vec<BotConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_configuration: Option<MatchConfiguration>,
    pub launcher_configuration: LauncherConfiguration,
}

/// 描述文件生成器
pub struct ConfigGenerator {
    attach_timeout_secs: f64,
    events: Arc<dyn EventSink>,
}

impl ConfigGenerator {
    pub const DEFAULT_ATTACH_TIMEOUT_SECS: f64 = 30.0;

    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            attach_timeout_secs: Self::DEFAULT_ATTACH_TIMEOUT_SECS,
            events,
        }
    }

    pub fn with_attach_timeout(mut self, secs: f64) -> Self {
        self.attach_timeout_secs = secs;
        self
    }

    /// 描述文件路径
    pub fn descriptor_path(profile: &BotProfile) -> PathBuf {
        profile.resolve(&PathBuf::from(DESCRIPTOR_FILE_NAME))
    }

    /// 渲染描述文件（不写盘，只检查 logo 是否存在）
    pub fn render(&self, profile: &BotProfile, mode: LaunchMode) -> Descriptor {
        let logo = profile.logo_file();
        let bot = BotConfiguration {
            name: profile.name.clone(),
            team: profile.team.index(),
            python_file: profile.script_file().to_string_lossy().into_owned(),
            config_file: profile.config_file().to_string_lossy().into_owned(),
            logo_file: if logo.exists() {
                logo.to_string_lossy().into_owned()
            } else {
                String::new()
            },
            requirements_file: profile.requirements_file().to_string_lossy().into_owned(),
            maximum_tick_rate_preference: profile.tick_rate_preference,
        };

        let online = mode == LaunchMode::OnlineAttach;
        let launcher = LauncherConfiguration {
            launcher_car_id: 0,
            launcher_team: profile.team.index(),
            launcher_primary_color: 0,
            launcher_secondary_color: 0,
            auto_save_replay: false,
            enable_rendering: false,
            enable_state_setting: !online,
            auto_start_bots: true,
            look_for_custom_maps: false,
            match_attach_timeout: online.then_some(self.attach_timeout_secs),
            enable_match_attachment: online.then_some(true),
        };

        match mode {
            LaunchMode::Exhibition => Descriptor {
                team_configurations: Some(vec![TeamConfiguration::default()]),
                bot_configurations: vec![bot],
                match_configuration: Some(MatchConfiguration::default()),
                launcher_configuration: launcher,
            },
            LaunchMode::OnlineAttach => Descriptor {
                team_configurations: None,
                bot_configurations: vec![bot],
                match_configuration: None,
                launcher_configuration: launcher,
            },
        }
    }

    /// 渲染并写入固定路径，返回文件路径
    ///
    /// 先写临时文件再 rename，重复调用以最后一次为准。
    pub fn render_to_file(&self, profile: &BotProfile, mode: LaunchMode) -> Result<PathBuf, LaunchError> {
        let path = Self::descriptor_path(profile);
        let descriptor = self.render(profile, mode);

        let write = || -> std::io::Result<()> {
            let json = serde_json::to_string_pretty(&descriptor).map_err(std::io::Error::other)?;
            let temp_file = path.with_extension("json.tmp");
            fs::write(&temp_file, json)?;
            fs::rename(&temp_file, &path)
        };

        write().map_err(|source| LaunchError::ConfigWriteFailed {
            path: path.clone(),
            source,
        })?;

        self.events.emit(LaunchEvent::DescriptorWritten {
            path: path.clone(),
            mode,
        });
        Ok(path)
    }
}
