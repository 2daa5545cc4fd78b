// src/inject/direct.rs
//! Direct 注入 - 调用 RLBot SetupManager
//!
//! 不同版本的 RLBot 暴露的入口不同，按顺序探测：
//! `startup_bot_agents` → `start_bot_agents` → `load_config`，使用第一个可用的。

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::timeout;
use tracing::debug;

use super::{InjectionResult, InjectionStrategy, StrategyKind};
use crate::descriptor::{ConfigGenerator, LaunchMode};
use crate::infra::python::{last_error_line, PythonRuntime};
use crate::infra::spawned::SpawnedProcess;
use crate::profile::BotProfile;

// 失败原因只取最后一行，保留少量尾部即可
const STDERR_TAIL_LINES: usize = 20;

const SUPPORT_CHECK_SCRIPT: &str = r#"import sys
from rlbot.setup_manager import SetupManager
sys.exit(0 if hasattr(SetupManager, sys.argv[1]) else 3)
"#;

// 启动 agent 后保持进程存活，agent 子进程由 SetupManager 管理
const LAUNCH_SCRIPT: &str = r#"import json, sys, time
from rlbot.setup_manager import SetupManager
method, agents, descriptor = sys.argv[1], json.loads(sys.argv[2]), sys.argv[3]
manager = SetupManager()
if method == "load_config":
    manager.load_config(descriptor)
else:
    getattr(manager, method)(agents)
while True:
    time.sleep(1)
"#;

/// 传给 SetupManager 的单个 agent 配置
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    pub name: String,
    pub team: u8,
    pub config_path: String,
    pub python_file: String,
}

impl AgentConfig {
    pub fn from_profile(profile: &BotProfile) -> Self {
        Self {
            name: profile.name.clone(),
            team: profile.team.index(),
            config_path: profile.config_file().to_string_lossy().into_owned(),
            python_file: profile.script_file().to_string_lossy().into_owned(),
        }
    }
}

/// SetupManager 入口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMethod {
    StartupBotAgents,
    StartBotAgents,
    LoadConfig,
}

impl SetupMethod {
    pub const ALL: [SetupMethod; 3] = [
        SetupMethod::StartupBotAgents,
        SetupMethod::StartBotAgents,
        SetupMethod::LoadConfig,
    ];

    pub fn attr(self) -> &'static str {
        match self {
            SetupMethod::StartupBotAgents => "startup_bot_agents",
            SetupMethod::StartBotAgents => "start_bot_agents",
            SetupMethod::LoadConfig => "load_config",
        }
    }
}

/// 宿主框架的一个启动入口
#[async_trait]
pub trait SetupCapability: Send + Sync {
    fn name(&self) -> &str;

    /// 当前安装的框架是否提供该入口
    async fn is_supported(&self) -> bool;

    /// 启动 agent；返回仍在运行的宿主进程（如果有）
    async fn start_agents(&self, agents: &[AgentConfig], descriptor: &Path) -> Result<Option<SpawnedProcess>>;
}

/// 有序的能力链，使用第一个受支持的入口
pub struct CapabilityChain {
    capabilities: Vec<Box<dyn SetupCapability>>,
}

impl CapabilityChain {
    pub fn new(capabilities: Vec<Box<dyn SetupCapability>>) -> Self {
        Self { capabilities }
    }

    /// RLBot SetupManager 的全部已知入口
    pub fn rlbot(python: PythonRuntime, working_dir: impl Into<PathBuf>, confirm_window: Duration) -> Self {
        let working_dir = working_dir.into();
        Self::new(
            SetupMethod::ALL
                .into_iter()
                .map(|method| {
                    Box::new(PythonSetupCapability::new(python.clone(), method, working_dir.clone(), confirm_window))
                        as Box<dyn SetupCapability>
                })
                .collect(),
        )
    }

    pub async fn resolve(&self) -> Option<&dyn SetupCapability> {
        for capability in &self.capabilities {
            if capability.is_supported().await {
                debug!(capability = capability.name(), "Using SetupManager method");
                return Some(capability.as_ref());
            }
        }
        None
    }
}

/// 通过 Python 解释器调用 SetupManager 的某个方法
pub struct PythonSetupCapability {
    python: PythonRuntime,
    method: SetupMethod,
    working_dir: PathBuf,
    confirm_window: Duration,
}

impl PythonSetupCapability {
    pub fn new(python: PythonRuntime, method: SetupMethod, working_dir: PathBuf, confirm_window: Duration) -> Self {
        Self {
            python,
            method,
            working_dir,
            confirm_window,
        }
    }
}

#[async_trait]
impl SetupCapability for PythonSetupCapability {
    fn name(&self) -> &str {
        self.method.attr()
    }

    async fn is_supported(&self) -> bool {
        self.python
            .run_inline(SUPPORT_CHECK_SCRIPT, &[self.method.attr()])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn start_agents(&self, agents: &[AgentConfig], descriptor: &Path) -> Result<Option<SpawnedProcess>> {
        let payload = serde_json::to_string(agents)?;
        let mut child = self
            .python
            .command()
            .arg("-c")
            .arg(LAUNCH_SCRIPT)
            .arg(self.method.attr())
            .arg(&payload)
            .arg(descriptor)
            .current_dir(&self.working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn RLBot setup process")?;

        let collector = tokio::spawn(collect_stderr(child.stderr.take(), STDERR_TAIL_LINES));

        // 在确认窗口内退出说明 SetupManager 抛了异常
        match timeout(self.confirm_window, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(None),
            Ok(Ok(status)) => {
                let lines = timeout(Duration::from_secs(1), collector)
                    .await
                    .ok()
                    .and_then(|joined| joined.ok())
                    .unwrap_or_default();
                let reason = last_error_line(Vec::from(lines).join("\n").as_bytes()).unwrap_or_else(|| status.to_string());
                bail!(reason)
            }
            Ok(Err(e)) => Err(anyhow!(e).context("failed to wait for RLBot setup process")),
            Err(_) => Ok(Some(SpawnedProcess::new(
                format!("rlbot {}", self.method.attr()),
                child,
            ))),
        }
    }
}

/// 持续读取 stderr 直到管道关闭，只保留最后 `keep` 行
///
/// 进程交出后仍在运行，读取任务会一直存在，所以不能无限累积。
async fn collect_stderr<R: AsyncRead + Unpin>(stderr: Option<R>, keep: usize) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(keep);
    let Some(stderr) = stderr else {
        return tail;
    };
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(line = %line, "rlbot stderr");
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

/// Direct 注入策略
pub struct DirectStrategy {
    chain: CapabilityChain,
    generator: Arc<ConfigGenerator>,
}

impl DirectStrategy {
    pub fn new(chain: CapabilityChain, generator: Arc<ConfigGenerator>) -> Self {
        Self { chain, generator }
    }
}

#[async_trait]
impl InjectionStrategy for DirectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn attempt(&self, profile: &BotProfile, mode: LaunchMode) -> InjectionResult {
        let descriptor = match self.generator.render_to_file(profile, mode) {
            Ok(path) => path,
            Err(e) => return InjectionResult::failure(StrategyKind::Direct, e.to_string()),
        };

        let Some(capability) = self.chain.resolve().await else {
            return InjectionResult::failure(
                StrategyKind::Direct,
                "no compatible startup method found in SetupManager",
            );
        };

        let agents = [AgentConfig::from_profile(profile)];
        match capability.start_agents(&agents, &descriptor).await {
            Ok(process) => InjectionResult::success(StrategyKind::Direct, process),
            Err(e) => InjectionResult::failure(StrategyKind::Direct, format!("{}: {:#}", capability.name(), e)),
        }
    }
}
