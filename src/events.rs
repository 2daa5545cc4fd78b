//! 事件模块 - 组件通过注入的 EventSink 上报进度和告警
//!
//! 各组件在构造时拿到 `Arc<dyn EventSink>`，不直接依赖全局日志状态。
//! 默认实现 `TracingSink` 转发到 tracing；`MemorySink` 用于测试和前端展示。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::deps::InstallStage;
use crate::descriptor::LaunchMode;
use crate::infra::process::ProcessInfo;
use crate::inject::StrategyKind;
use crate::orchestrator::OrchestratorState;

/// 启动流程事件
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchEvent {
    /// 状态机迁移
    StateChanged {
        from: OrchestratorState,
        to: OrchestratorState,
    },
    /// 配置文件中无法解析的行（已跳过）
    ProfileWarning {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// 配置文件已加载
    ProfileLoaded { path: PathBuf, name: String },
    /// 配置文件中的值已改写
    ProfileUpdated { path: PathBuf, keys: Vec<String> },
    /// 配置文件改写失败
    ProfileUpdateFailed { path: PathBuf, reason: String },
    /// 缺少必需文件
    MissingFiles { files: Vec<PathBuf> },
    /// 缺少依赖包
    MissingPackages { packages: Vec<String> },
    /// 开始执行某个安装阶段
    InstallStarted { stage: InstallStage },
    /// 安装阶段失败
    InstallFailed {
        stage: InstallStage,
        target: String,
        reason: String,
    },
    /// 开始等待宿主进程
    WaitingForHost { names: Vec<String> },
    /// 检测到宿主进程
    HostDetected { process: ProcessInfo },
    /// 描述文件已写入
    DescriptorWritten { path: PathBuf, mode: LaunchMode },
    /// 开始尝试某个注入策略
    StrategyStarted { strategy: StrategyKind },
    /// 注入策略失败
    StrategyFailed {
        strategy: StrategyKind,
        reason: String,
    },
    /// 注入成功
    Injected {
        strategy: StrategyKind,
        mode: LaunchMode,
    },
    /// 启动失败（致命）
    LaunchFailed { reason: String },
    /// 监控发现宿主进程消失（非致命）
    HostProcessLost { mode: LaunchMode },
    /// 宿主进程重新出现
    HostProcessRecovered,
    /// 外部进程已终止
    ProcessTerminated { pid: Option<u32>, forced: bool },
}

/// 事件接收器
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LaunchEvent);
}

/// 转发到 tracing 的默认接收器
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LaunchEvent) {
        match event {
            LaunchEvent::StateChanged { from, to } => {
                debug!(%from, %to, "Orchestrator state changed");
            }
            LaunchEvent::ProfileWarning { path, line, message } => {
                warn!(path = %path.display(), line, "Skipping malformed profile line: {}", message);
            }
            LaunchEvent::ProfileLoaded { path, name } => {
                info!(path = %path.display(), "Loaded bot configuration: {}", name);
            }
            LaunchEvent::ProfileUpdated { path, keys } => {
                info!(path = %path.display(), "Updated bot config with: {}", keys.join(", "));
            }
            LaunchEvent::ProfileUpdateFailed { path, reason } => {
                error!(path = %path.display(), "Failed to update config: {}", reason);
            }
            LaunchEvent::MissingFiles { files } => {
                for file in files {
                    error!(file = %file.display(), "Required file missing");
                }
            }
            LaunchEvent::MissingPackages { packages } => {
                warn!(packages = %packages.join(", "), "Missing Python packages");
            }
            LaunchEvent::InstallStarted { stage } => {
                info!(%stage, "Installing dependencies");
            }
            LaunchEvent::InstallFailed { stage, target, reason } => {
                warn!(%stage, target = %target, "Install failed: {}", reason);
            }
            LaunchEvent::WaitingForHost { names } => {
                info!(names = %names.join(", "), "Waiting for Rocket League to start...");
            }
            LaunchEvent::HostDetected { process } => {
                info!(pid = process.pid, "Found Rocket League process: {}", process.name);
            }
            LaunchEvent::DescriptorWritten { path, mode } => {
                info!(path = %path.display(), %mode, "Created RLBot config");
            }
            LaunchEvent::StrategyStarted { strategy } => {
                info!(%strategy, "Attempting bot injection");
            }
            LaunchEvent::StrategyFailed { strategy, reason } => {
                warn!(%strategy, "Injection strategy failed: {}", reason);
            }
            LaunchEvent::Injected { strategy, mode } => {
                info!(%strategy, %mode, "Bot injected");
            }
            LaunchEvent::LaunchFailed { reason } => {
                error!("Launch failed: {}", reason);
            }
            LaunchEvent::HostProcessLost { mode } => {
                warn!(%mode, "Rocket League process not found. Bot may have been disconnected.");
            }
            LaunchEvent::HostProcessRecovered => {
                info!("Rocket League process is back");
            }
            LaunchEvent::ProcessTerminated { pid, forced } => {
                info!(?pid, forced, "External process terminated");
            }
        }
    }
}

/// 记录所有事件的接收器
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LaunchEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 已记录事件的副本
    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// 统计满足条件的事件数量
    pub fn count(&self, predicate: impl Fn(&LaunchEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: LaunchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
