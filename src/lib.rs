//! Nexto Launcher - 把 Nexto bot 注入 Rocket League 的启动编排器
//!
//! 流程：依赖检查 → 等待宿主进程 → 生成 RLBot 描述文件 → 注入（Direct 失败回退 GUI）→ 运行监控。

pub mod cli;
pub mod deps;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod infra;
pub mod inject;
pub mod monitor;
pub mod orchestrator;
pub mod profile;
pub mod settings;

pub use deps::{DependencyReport, DependencyResolver, InstallStage, PackageManager, PipPackageManager};
pub use descriptor::{ConfigGenerator, Descriptor, LaunchMode};
pub use error::LaunchError;
pub use events::{EventSink, LaunchEvent, MemorySink, TracingSink};
pub use infra::{ProcessInfo, ProcessScanner, ProcessSource, ProcessWatcher, PythonRuntime, SpawnedProcess, WaitOutcome};
pub use inject::{InjectionResult, InjectionStrategy, Injector, StrategyKind};
pub use monitor::Monitor;
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorState, StartOptions, StateCell, StopHandle};
pub use profile::{BotProfile, ConfigStore, ConfigValue, Team};
pub use settings::LauncherSettings;
