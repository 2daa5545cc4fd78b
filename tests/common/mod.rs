//! 集成测试共用的假实现

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::Instant;

use nexto_launcher::{
    BotProfile, Collaborators, ConfigStore, EventSink, InjectionResult, InjectionStrategy, LaunchMode,
    LauncherSettings, MemorySink, Orchestrator, PackageManager, ProcessInfo, ProcessSource, SpawnedProcess,
    StrategyKind,
};

pub const HOST: &str = "RocketLeague.exe";

pub fn host_process(pid: u32) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: HOST.to_string(),
        executable_path: None,
        created_at: Utc::now(),
    }
}

/// 可随时开关的宿主进程
#[derive(Clone, Default)]
pub struct SwitchableHost(pub Arc<AtomicBool>);

impl SwitchableHost {
    pub fn running() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

impl ProcessSource for SwitchableHost {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        if self.0.load(Ordering::SeqCst) {
            vec![host_process(4242)]
        } else {
            Vec::new()
        }
    }
}

/// 在指定时刻出现的宿主进程（配合 tokio 暂停时间）
pub struct HostAppearingAt(pub Instant);

impl ProcessSource for HostAppearingAt {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        if Instant::now() >= self.0 {
            vec![host_process(7)]
        } else {
            Vec::new()
        }
    }
}

/// 包管理器：`installed` 中的包视为已安装，安装操作只记录调用
#[derive(Default)]
pub struct FakePackages {
    pub installed: Mutex<HashSet<String>>,
    pub install_calls: AtomicUsize,
}

impl FakePackages {
    pub fn with(packages: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            installed: Mutex::new(packages.iter().map(|p| p.to_string()).collect()),
            install_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PackageManager for FakePackages {
    async fn is_installed(&self, package: &str) -> bool {
        self.installed.lock().unwrap().contains(package)
    }

    async fn install_manifest(&self, _manifest: &Path) -> Result<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        bail!("no network")
    }

    async fn install(&self, _package: &str) -> Result<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        bail!("no network")
    }
}

/// 固定结果的注入策略，记录调用次数和模式
pub struct ScriptedStrategy {
    pub kind: StrategyKind,
    pub succeed: bool,
    pub calls: Arc<AtomicUsize>,
    pub modes: Arc<Mutex<Vec<LaunchMode>>>,
}

impl ScriptedStrategy {
    pub fn new(kind: StrategyKind, succeed: bool) -> Self {
        Self {
            kind,
            succeed,
            calls: Arc::new(AtomicUsize::new(0)),
            modes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl InjectionStrategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, _profile: &BotProfile, mode: LaunchMode) -> InjectionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if self.succeed {
            InjectionResult::success(self.kind, None)
        } else {
            InjectionResult::failure(self.kind, format!("{} strategy unavailable", self.kind))
        }
    }
}

/// 真正创建子进程（`sleep 60`）的注入策略，进程交给编排器管理
///
/// 创建进程后通知 `spawned`，再停顿 `hold` 才返回，便于在 Injecting 期间请求停止。
pub struct SpawningStrategy {
    pub kind: StrategyKind,
    pub hold: Duration,
    pub spawned: Arc<Notify>,
}

impl SpawningStrategy {
    pub fn new(kind: StrategyKind, hold: Duration) -> Self {
        Self {
            kind,
            hold,
            spawned: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl InjectionStrategy for SpawningStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, _profile: &BotProfile, _mode: LaunchMode) -> InjectionResult {
        let child = match tokio::process::Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return InjectionResult::failure(self.kind, e.to_string()),
        };
        self.spawned.notify_one();
        tokio::time::sleep(self.hold).await;
        InjectionResult::success(self.kind, Some(SpawnedProcess::new("sleep", child)))
    }
}

/// 进程是否仍然存在
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// 在临时目录中创建完整的 bot 目录
pub fn bot_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("bot.cfg"),
        "[Locations]\nname = Nexto\npython_file = ./bot.py\nrequirements_file = ./requirements.txt\n\n[Details]\nteam = 0\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("bot.py"), "# bot\n").unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "rlbot\nnumpy\n").unwrap();
    dir
}

/// 测试用设置：短超时、无等待稳定期
pub fn test_settings() -> LauncherSettings {
    LauncherSettings {
        host_process_names: vec![HOST.to_string()],
        required_packages: vec!["rlbot".to_string(), "numpy".to_string()],
        host_wait_timeout_secs: 4,
        host_poll_interval_secs: 2,
        host_settle_secs: 0,
        monitor_interval_secs: 5,
        stop_grace_secs: 1,
        ..LauncherSettings::default()
    }
}

/// 组装好的编排器及其观测点
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub sink: Arc<MemorySink>,
    pub packages: Arc<FakePackages>,
    pub direct_calls: Arc<AtomicUsize>,
    pub gui_calls: Arc<AtomicUsize>,
    pub gui_modes: Arc<Mutex<Vec<LaunchMode>>>,
}

pub struct HarnessBuilder {
    pub settings: LauncherSettings,
    pub processes: Box<dyn ProcessSource>,
    pub packages: Arc<FakePackages>,
    pub direct_ok: bool,
    pub gui_ok: bool,
    /// 替换默认的 Direct 假实现
    pub direct: Option<Box<dyn InjectionStrategy>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: test_settings(),
            processes: Box::new(SwitchableHost::running()),
            packages: FakePackages::with(&["rlbot", "numpy"]),
            direct_ok: true,
            gui_ok: true,
            direct: None,
        }
    }

    pub fn build(self, dir: &Path) -> Harness {
        let sink = MemorySink::new();
        let events: Arc<dyn EventSink> = sink.clone();
        let profile = ConfigStore::new(events.clone()).load(&dir.join("bot.cfg"));

        let direct = ScriptedStrategy::new(StrategyKind::Direct, self.direct_ok);
        let gui = ScriptedStrategy::new(StrategyKind::GuiMediated, self.gui_ok);
        let direct_calls = direct.calls.clone();
        let gui_calls = gui.calls.clone();
        let gui_modes = gui.modes.clone();

        let orchestrator = Orchestrator::new(
            profile,
            self.settings,
            Collaborators {
                processes: self.processes,
                packages: self.packages.clone(),
                direct: self.direct.unwrap_or_else(|| Box::new(direct)),
                gui: Box::new(gui),
                events,
            },
        );

        Harness {
            orchestrator,
            sink,
            packages: self.packages,
            direct_calls,
            gui_calls,
            gui_modes,
        }
    }
}
