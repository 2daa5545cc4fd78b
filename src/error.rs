//! 错误类型 - 启动流程中的致命错误分类

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::orchestrator::OrchestratorState;

/// 启动失败原因
///
/// 只包含会让 `Orchestrator::start` 失败的情况；宿主进程短暂消失
/// 属于监控告警，见 `LaunchEvent::HostProcessLost`。
#[derive(Debug, Error)]
pub enum LaunchError {
    /// 缺少 bot 必需文件（无法通过安装修复）
    #[error("required files missing: {}", display_paths(.files))]
    MissingFile { files: Vec<PathBuf> },

    /// 依赖包在安装策略执行后仍不可用
    #[error("dependencies unavailable: {}", .packages.join(", "))]
    DependencyUnavailable { packages: Vec<String> },

    /// 等待宿主进程超时
    #[error("host process not detected within {}s", .waited.as_secs())]
    HostProcessNotFound { waited: Duration },

    /// 所有注入策略都失败
    #[error("bot injection failed: {reason}")]
    InjectionFailed { reason: String },

    /// 描述文件写入失败
    #[error("failed to write descriptor {}: {source}", .path.display())]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 启动过程中收到停止请求
    #[error("launch cancelled by stop request")]
    Cancelled,

    /// 当前状态不允许该操作
    #[error("operation not allowed in state {state}")]
    InvalidState { state: OrchestratorState },
}

fn display_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
