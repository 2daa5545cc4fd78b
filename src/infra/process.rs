//! 进程扫描模块 - 检测宿主游戏进程

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// 进程快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub executable_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// 进程枚举来源
pub trait ProcessSource: Send + Sync {
    /// 当前所有存活进程的快照
    fn snapshot(&self) -> Vec<ProcessInfo>;
}

/// 基于 sysinfo 的进程扫描器
pub struct ProcessScanner {
    system: Mutex<System>,
}

impl ProcessScanner {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcessScanner {
    fn snapshot(&self) -> Vec<ProcessInfo> {
        let Ok(mut system) = self.system.lock() else {
            return Vec::new();
        };
        // 只刷新进程表；CPU、内存、磁盘等信息用不到
        system.refresh_processes(ProcessesToUpdate::All);

        // 枚举期间退出或无权限读取的进程会缺字段，直接跳过
        system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().to_string();
                if name.is_empty() {
                    return None;
                }
                Some(ProcessInfo {
                    pid: pid.as_u32(),
                    name,
                    executable_path: process.exe().map(|p| p.to_path_buf()),
                    created_at: DateTime::from_timestamp(process.start_time() as i64, 0)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Found,
    TimedOut,
    Cancelled,
}

/// 宿主进程检测器
pub struct ProcessWatcher {
    source: Box<dyn ProcessSource>,
    poll_interval: Duration,
}

impl ProcessWatcher {
    /// 默认轮询间隔
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(source: Box<dyn ProcessSource>) -> Self {
        Self {
            source,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// 使用系统进程表
    pub fn system() -> Self {
        Self::new(Box::new(ProcessScanner::new()))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 名称精确匹配的进程
    pub fn list_matching(&self, names: &HashSet<String>) -> Vec<ProcessInfo> {
        self.source
            .snapshot()
            .into_iter()
            .filter(|p| names.contains(&p.name))
            .collect()
    }

    pub fn is_any_running(&self, names: &HashSet<String>) -> bool {
        !self.list_matching(names).is_empty()
    }

    /// 轮询直到进程出现、超时或被取消
    ///
    /// 先检查一次再判断超时，所以 `timeout` 为 0 时不会阻塞。
    pub async fn wait_for(
        &self,
        names: &HashSet<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if self.is_any_running(names) {
                return WaitOutcome::Found;
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return WaitOutcome::TimedOut;
            }

            let pause = self.poll_interval.min(timeout - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = sleep(pause) => {}
            }
        }
    }
}
