//! Orchestrator 模块 - 启动流程状态机
//!
//! 依次执行：依赖解析 → 等待宿主进程 → 生成描述文件 → 注入 → 运行监控。
//! 状态只能向前迁移；停止请求通过 `CancellationToken` 协作式传递。

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deps::{DependencyResolver, PackageManager, PipPackageManager};
use crate::descriptor::{ConfigGenerator, LaunchMode};
use crate::error::LaunchError;
use crate::events::{EventSink, LaunchEvent};
use crate::infra::process::{ProcessScanner, ProcessSource, ProcessWatcher, WaitOutcome};
use crate::infra::python::PythonRuntime;
use crate::infra::spawned::SpawnedProcess;
use crate::inject::{
    CapabilityChain, DirectStrategy, GuiMediatedStrategy, InjectionStrategy, Injector, StrategyKind,
};
use crate::monitor::Monitor;
use crate::profile::{BotProfile, Team};
use crate::settings::LauncherSettings;

/// 在线模式失败时附加的说明
const ONLINE_LIMITATION: &str = "online attach only works in custom/private matches that allow bots";

/// 编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    ResolvingDependencies,
    WaitingForHost,
    GeneratingConfig,
    Injecting,
    Running,
    Stopping,
    Failed,
    Stopped,
}

impl OrchestratorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrchestratorState::Failed | OrchestratorState::Stopped)
    }

    fn rank(self) -> u8 {
        match self {
            OrchestratorState::Idle => 0,
            OrchestratorState::ResolvingDependencies => 1,
            OrchestratorState::WaitingForHost => 2,
            OrchestratorState::GeneratingConfig => 3,
            OrchestratorState::Injecting => 4,
            OrchestratorState::Running => 5,
            OrchestratorState::Stopping => 6,
            OrchestratorState::Failed => 7,
            OrchestratorState::Stopped => 8,
        }
    }

    /// 迁移规则：只能向前（可以跳过），终态不可离开，
    /// `Stopped` 只能从 `Stopping` 进入
    pub fn can_advance_to(self, next: OrchestratorState) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            OrchestratorState::Idle => false,
            OrchestratorState::Failed | OrchestratorState::Stopping => true,
            OrchestratorState::Stopped => self == OrchestratorState::Stopping,
            _ => self != OrchestratorState::Stopping && next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::ResolvingDependencies => "resolving_dependencies",
            OrchestratorState::WaitingForHost => "waiting_for_host",
            OrchestratorState::GeneratingConfig => "generating_config",
            OrchestratorState::Injecting => "injecting",
            OrchestratorState::Running => "running",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::Failed => "failed",
            OrchestratorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// 编排器与监控任务共享的状态
pub struct StateCell {
    state: RwLock<OrchestratorState>,
    events: Arc<dyn EventSink>,
}

impl StateCell {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            state: RwLock::new(OrchestratorState::Idle),
            events,
        }
    }

    pub fn get(&self) -> OrchestratorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// 尝试迁移，非法迁移返回 false 且状态不变
    pub fn advance(&self, next: OrchestratorState) -> bool {
        let from = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let current = *state;
            if !current.can_advance_to(next) {
                debug!(from = %current, to = %next, "Rejected state transition");
                return false;
            }
            std::mem::replace(&mut *state, next)
        };
        self.events.emit(LaunchEvent::StateChanged { from, to: next });
        true
    }
}

/// 可跨任务使用的停止句柄
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
    state: Arc<StateCell>,
}

impl StopHandle {
    /// 请求停止；实际清理由 `Orchestrator::stop` 或正在执行的 `start` 完成
    pub fn request_stop(&self) {
        if !self.state.get().is_terminal() {
            self.state.advance(OrchestratorState::Stopping);
        }
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 等待停止请求
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

/// 启动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// 宿主未运行时是否等待
    pub wait_for_host: bool,
    /// 跳过 Direct，只用 GUI
    pub prefer_gui: bool,
    pub mode: LaunchMode,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            wait_for_host: true,
            prefer_gui: false,
            mode: LaunchMode::Exhibition,
        }
    }
}

/// 编排器依赖的外部能力
pub struct Collaborators {
    pub processes: Box<dyn ProcessSource>,
    pub packages: Arc<dyn PackageManager>,
    pub direct: Box<dyn InjectionStrategy>,
    pub gui: Box<dyn InjectionStrategy>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// 使用真实系统：sysinfo 进程表、pip、RLBot
    pub fn system(
        settings: &LauncherSettings,
        profile: &BotProfile,
        events: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let python = PythonRuntime::detect(settings.python.as_deref())?;
        info!(interpreter = %python.interpreter().display(), "Using python interpreter");

        let generator = Arc::new(
            ConfigGenerator::new(events.clone()).with_attach_timeout(settings.match_attach_timeout_secs),
        );
        let chain = CapabilityChain::rlbot(python.clone(), profile.working_dir.clone(), settings.direct_confirm());

        Ok(Self {
            processes: Box::new(ProcessScanner::new()),
            packages: Arc::new(PipPackageManager::new(python.clone(), profile.working_dir.clone())),
            direct: Box::new(DirectStrategy::new(chain, generator.clone())),
            gui: Box::new(GuiMediatedStrategy::new(python, generator)),
            events,
        })
    }
}

/// 启动编排器
pub struct Orchestrator {
    profile: BotProfile,
    settings: LauncherSettings,
    resolver: DependencyResolver,
    watcher: Arc<ProcessWatcher>,
    generator: ConfigGenerator,
    injector: Injector,
    events: Arc<dyn EventSink>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
    process: Option<SpawnedProcess>,
    failure: Option<String>,
}

impl Orchestrator {
    pub fn new(profile: BotProfile, settings: LauncherSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            processes,
            packages,
            direct,
            gui,
            events,
        } = collaborators;

        let watcher = Arc::new(ProcessWatcher::new(processes).with_poll_interval(settings.host_poll_interval()));
        let resolver = DependencyResolver::new(packages, profile.requirements_file(), events.clone());
        let generator = ConfigGenerator::new(events.clone()).with_attach_timeout(settings.match_attach_timeout_secs);
        let injector = Injector::new(direct, gui, events.clone());

        Self {
            profile,
            settings,
            resolver,
            watcher,
            generator,
            injector,
            state: Arc::new(StateCell::new(events.clone())),
            events,
            cancel: CancellationToken::new(),
            monitor: None,
            process: None,
            failure: None,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.get()
    }

    pub fn profile(&self) -> &BotProfile {
        &self.profile
    }

    /// 最近一次失败的原因
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }

    /// 覆盖队伍，只允许在启动前调用
    pub fn set_team(&mut self, team: Team) -> Result<(), LaunchError> {
        let state = self.state.get();
        if state != OrchestratorState::Idle {
            return Err(LaunchError::InvalidState { state });
        }
        self.profile.team = team;
        Ok(())
    }

    /// 执行完整启动流程，成功后进入 Running 并立即返回
    pub async fn start(&mut self, options: StartOptions) -> Result<StrategyKind, LaunchError> {
        let state = self.state.get();
        if state != OrchestratorState::Idle {
            return Err(LaunchError::InvalidState { state });
        }

        info!(
            bot = %self.profile.name,
            team = %self.profile.team,
            mode = %options.mode,
            "Starting launch"
        );

        match self.run(options).await {
            Ok(strategy) => Ok(strategy),
            Err(e) if matches!(e, LaunchError::Cancelled) || self.cancel.is_cancelled() => {
                info!("Launch cancelled, tearing down");
                self.shutdown().await;
                Err(LaunchError::Cancelled)
            }
            Err(e) => {
                let reason = e.to_string();
                self.events.emit(LaunchEvent::LaunchFailed { reason: reason.clone() });
                self.failure = Some(reason);
                self.state.advance(OrchestratorState::Failed);
                Err(e)
            }
        }
    }

    /// 停止运行；终态下为空操作
    pub async fn stop(&mut self) {
        if self.state.get().is_terminal() {
            return;
        }
        self.shutdown().await;
    }

    async fn run(&mut self, options: StartOptions) -> Result<StrategyKind, LaunchError> {
        self.enter(OrchestratorState::ResolvingDependencies)?;
        self.resolve_dependencies().await?;

        if options.wait_for_host {
            self.wait_for_host().await?;
        }

        self.enter(OrchestratorState::GeneratingConfig)?;
        self.generator.render_to_file(&self.profile, options.mode)?;

        self.enter(OrchestratorState::Injecting)?;
        let mut result = self
            .injector
            .auto_inject(&self.profile, options.mode, options.prefer_gui, &self.cancel)
            .await;
        self.process = result.process.take();

        if self.cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }
        if !result.succeeded {
            let mut reason = result.failure_reason.unwrap_or_else(|| "unknown error".to_string());
            if options.mode == LaunchMode::OnlineAttach {
                reason = format!("{} ({})", reason, ONLINE_LIMITATION);
            }
            return Err(LaunchError::InjectionFailed { reason });
        }

        self.enter(OrchestratorState::Running)?;
        self.events.emit(LaunchEvent::Injected {
            strategy: result.strategy_used,
            mode: options.mode,
        });

        let monitor = Monitor::new(
            self.watcher.clone(),
            self.host_names(),
            self.settings.monitor_interval(),
            options.mode,
            self.events.clone(),
            self.state.clone(),
        );
        self.monitor = Some(monitor.spawn(self.cancel.clone()));

        Ok(result.strategy_used)
    }

    /// 状态迁移失败意味着停止请求已经把状态改成了 Stopping
    fn enter(&self, next: OrchestratorState) -> Result<(), LaunchError> {
        if self.cancel.is_cancelled() || !self.state.advance(next) {
            return Err(LaunchError::Cancelled);
        }
        Ok(())
    }

    fn required_files(&self) -> Vec<PathBuf> {
        let mut files = vec![
            self.profile.script_file(),
            self.profile.requirements_file(),
            self.profile.config_file(),
        ];
        files.extend(
            self.settings
                .extra_required_files
                .iter()
                .map(|f| self.profile.resolve(Path::new(f))),
        );
        files
    }

    fn host_names(&self) -> HashSet<String> {
        self.settings.host_process_names.iter().cloned().collect()
    }

    async fn resolve_dependencies(&self) -> Result<(), LaunchError> {
        let report = self
            .resolver
            .ensure(
                &self.required_files(),
                &self.settings.required_packages,
                self.settings.auto_install,
                &self.cancel,
            )
            .await;

        if report.cancelled {
            return Err(LaunchError::Cancelled);
        }
        if !report.missing_files.is_empty() {
            return Err(LaunchError::MissingFile {
                files: report.missing_files,
            });
        }
        if !report.missing_packages.is_empty() {
            return Err(LaunchError::DependencyUnavailable {
                packages: report.missing_packages,
            });
        }
        Ok(())
    }

    /// 宿主未运行时进入 WaitingForHost 并轮询，进程出现后再等 `host_settle` 稳定期
    ///
    /// 宿主已在运行时直接继续，不等待稳定期。
    async fn wait_for_host(&self) -> Result<(), LaunchError> {
        let names = self.host_names();
        if !self.watcher.is_any_running(&names) {
            self.enter(OrchestratorState::WaitingForHost)?;
            self.events.emit(LaunchEvent::WaitingForHost {
                names: self.settings.host_process_names.clone(),
            });

            let timeout = self.settings.host_wait_timeout();
            match self.watcher.wait_for(&names, timeout, &self.cancel).await {
                WaitOutcome::Found => {}
                WaitOutcome::TimedOut => return Err(LaunchError::HostProcessNotFound { waited: timeout }),
                WaitOutcome::Cancelled => return Err(LaunchError::Cancelled),
            }

            // 进程刚出现时游戏还在加载
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(LaunchError::Cancelled),
                _ = sleep(self.settings.host_settle()) => {}
            }
        }

        if let Some(process) = self.watcher.list_matching(&names).into_iter().next() {
            self.events.emit(LaunchEvent::HostDetected { process });
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.state.advance(OrchestratorState::Stopping);
        self.cancel.cancel();

        if let Some(handle) = self.monitor.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        if let Some(process) = self.process.take() {
            let label = process.label().to_string();
            match process.terminate(self.settings.stop_grace()).await {
                Ok(termination) => self.events.emit(LaunchEvent::ProcessTerminated {
                    pid: termination.pid,
                    forced: termination.forced,
                }),
                Err(e) => warn!(process = %label, error = %e, "Failed to terminate process"),
            }
        }

        self.state.advance(OrchestratorState::Stopped);
        info!("Launcher stopped");
    }
}
