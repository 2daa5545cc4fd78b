// src/inject/gui.rs
//! GUI 注入 - 启动 rlbot_gui 并把描述文件交给它

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tracing::info;

use super::{InjectionResult, InjectionStrategy, StrategyKind};
use crate::descriptor::{ConfigGenerator, LaunchMode};
use crate::infra::python::PythonRuntime;
use crate::infra::spawned::SpawnedProcess;
use crate::profile::BotProfile;

const GUI_MODULE: &str = "rlbot_gui";

/// 通过 RLBot GUI 启动
///
/// 进程成功创建即视为成功，GUI 内部是否真正加载了 bot 不做确认。
pub struct GuiMediatedStrategy {
    python: PythonRuntime,
    generator: Arc<ConfigGenerator>,
}

impl GuiMediatedStrategy {
    pub fn new(python: PythonRuntime, generator: Arc<ConfigGenerator>) -> Self {
        Self { python, generator }
    }

    /// `-m rlbot_gui --config <path> [--attach-mode true]`
    pub fn gui_args(descriptor: &Path, mode: LaunchMode) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            GUI_MODULE.to_string(),
            "--config".to_string(),
            descriptor.to_string_lossy().into_owned(),
        ];
        if mode == LaunchMode::OnlineAttach {
            args.push("--attach-mode".to_string());
            args.push("true".to_string());
        }
        args
    }

    fn spawn(&self, descriptor: &Path, mode: LaunchMode, working_dir: &Path) -> std::io::Result<SpawnedProcess> {
        let child = self
            .python
            .command()
            .args(Self::gui_args(descriptor, mode))
            .current_dir(working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(SpawnedProcess::new(GUI_MODULE, child))
    }
}

#[async_trait]
impl InjectionStrategy for GuiMediatedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GuiMediated
    }

    async fn attempt(&self, profile: &BotProfile, mode: LaunchMode) -> InjectionResult {
        let descriptor = match self.generator.render_to_file(profile, mode) {
            Ok(path) => path,
            Err(e) => return InjectionResult::failure(StrategyKind::GuiMediated, e.to_string()),
        };

        match self.spawn(&descriptor, mode, &profile.working_dir) {
            Ok(process) => {
                info!(pid = ?process.pid(), config = %descriptor.display(), "RLBot GUI started");
                InjectionResult::success(StrategyKind::GuiMediated, Some(process))
            }
            Err(e) => InjectionResult::failure(
                StrategyKind::GuiMediated,
                format!("failed to start RLBot GUI: {}", e),
            ),
        }
    }
}
