// src/inject/mod.rs
//! 注入策略模块
//!
//! 两种可互换的策略：
//! - Direct：通过 RLBot 的 SetupManager 接口直接启动 agent
//! - GuiMediated：启动 RLBot GUI 并把描述文件交给它
//!
//! `Injector` 负责按顺序回退，任何时刻最多只有一个尝试在进行。

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::descriptor::LaunchMode;
use crate::events::{EventSink, LaunchEvent};
use crate::infra::spawned::SpawnedProcess;
use crate::profile::BotProfile;

pub mod direct;
pub mod gui;

pub use direct::{AgentConfig, CapabilityChain, DirectStrategy, PythonSetupCapability, SetupCapability, SetupMethod};
pub use gui::GuiMediatedStrategy;

/// 策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Direct,
    GuiMediated,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::GuiMediated => write!(f, "gui"),
        }
    }
}

/// 单次注入结果
#[derive(Debug)]
pub struct InjectionResult {
    pub succeeded: bool,
    pub strategy_used: StrategyKind,
    pub failure_reason: Option<String>,
    /// 策略启动的外部进程，由调用方负责终止
    pub process: Option<SpawnedProcess>,
}

impl InjectionResult {
    pub fn success(strategy: StrategyKind, process: Option<SpawnedProcess>) -> Self {
        Self {
            succeeded: true,
            strategy_used: strategy,
            failure_reason: None,
            process,
        }
    }

    pub fn failure(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            strategy_used: strategy,
            failure_reason: Some(reason.into()),
            process: None,
        }
    }
}

/// 注入策略 trait
#[async_trait]
pub trait InjectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// 尝试注入；宿主框架的错误都转成失败结果，不向上抛
    async fn attempt(&self, profile: &BotProfile, mode: LaunchMode) -> InjectionResult;
}

/// 按顺序回退的注入器
pub struct Injector {
    direct: Box<dyn InjectionStrategy>,
    gui: Box<dyn InjectionStrategy>,
    events: Arc<dyn EventSink>,
}

impl Injector {
    pub fn new(
        direct: Box<dyn InjectionStrategy>,
        gui: Box<dyn InjectionStrategy>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { direct, gui, events }
    }

    /// 自动选择策略
    ///
    /// `prefer_gui` 为 false 时先试 Direct，失败后回退到 GUI；为 true 时只用 GUI。
    /// 最多两次尝试，严格串行。
    pub async fn auto_inject(
        &self,
        profile: &BotProfile,
        mode: LaunchMode,
        prefer_gui: bool,
        cancel: &CancellationToken,
    ) -> InjectionResult {
        if !prefer_gui {
            let result = self.run(self.direct.as_ref(), profile, mode).await;
            if result.succeeded || cancel.is_cancelled() {
                return result;
            }
        }
        self.run(self.gui.as_ref(), profile, mode).await
    }

    async fn run(&self, strategy: &dyn InjectionStrategy, profile: &BotProfile, mode: LaunchMode) -> InjectionResult {
        self.events.emit(LaunchEvent::StrategyStarted {
            strategy: strategy.kind(),
        });
        let result = strategy.attempt(profile, mode).await;
        if let Some(reason) = result.failure_reason.as_ref().filter(|_| !result.succeeded) {
            self.events.emit(LaunchEvent::StrategyFailed {
                strategy: strategy.kind(),
                reason: reason.clone(),
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStrategy {
        kind: StrategyKind,
        succeed: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InjectionStrategy for CountingStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn attempt(&self, _profile: &BotProfile, _mode: LaunchMode) -> InjectionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                InjectionResult::success(self.kind, None)
            } else {
                InjectionResult::failure(self.kind, "host API raised")
            }
        }
    }

    fn injector(direct_ok: bool, gui_ok: bool) -> (Injector, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let direct_calls = Arc::new(AtomicUsize::new(0));
        let gui_calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new(
            Box::new(CountingStrategy {
                kind: StrategyKind::Direct,
                succeed: direct_ok,
                calls: direct_calls.clone(),
            }),
            Box::new(CountingStrategy {
                kind: StrategyKind::GuiMediated,
                succeed: gui_ok,
                calls: gui_calls.clone(),
            }),
            MemorySink::new(),
        );
        (injector, direct_calls, gui_calls)
    }

    fn profile() -> BotProfile {
        BotProfile::defaults(".")
    }

    #[tokio::test]
    async fn test_direct_success_skips_gui() {
        let (injector, direct, gui) = injector(true, true);
        let result = injector
            .auto_inject(&profile(), LaunchMode::Exhibition, false, &CancellationToken::new())
            .await;

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, StrategyKind::Direct);
        assert_eq!(direct.load(Ordering::SeqCst), 1);
        assert_eq!(gui.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_direct_failure_falls_back_once() {
        let (injector, direct, gui) = injector(false, true);
        let result = injector
            .auto_inject(&profile(), LaunchMode::OnlineAttach, false, &CancellationToken::new())
            .await;

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, StrategyKind::GuiMediated);
        assert_eq!(direct.load(Ordering::SeqCst), 1);
        assert_eq!(gui.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefer_gui_never_calls_direct() {
        let (injector, direct, gui) = injector(true, false);
        let result = injector
            .auto_inject(&profile(), LaunchMode::Exhibition, true, &CancellationToken::new())
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.strategy_used, StrategyKind::GuiMediated);
        assert_eq!(result.failure_reason.as_deref(), Some("host API raised"));
        assert_eq!(direct.load(Ordering::SeqCst), 0);
        assert_eq!(gui.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_fail_is_two_attempts() {
        let (injector, direct, gui) = injector(false, false);
        let result = injector
            .auto_inject(&profile(), LaunchMode::Exhibition, false, &CancellationToken::new())
            .await;

        assert!(!result.succeeded);
        assert_eq!(direct.load(Ordering::SeqCst) + gui.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_after_direct_failure_skips_gui() {
        let (injector, _direct, gui) = injector(false, true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = injector
            .auto_inject(&profile(), LaunchMode::Exhibition, false, &cancel)
            .await;

        assert!(!result.succeeded);
        assert_eq!(gui.load(Ordering::SeqCst), 0);
    }
}
