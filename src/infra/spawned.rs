//! 外部进程句柄 - 先温和终止，超时后强制结束

use anyhow::Result;
use std::process::Command;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 由注入策略启动的外部进程
#[derive(Debug)]
pub struct SpawnedProcess {
    label: String,
    child: Child,
}

/// 终止结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub pid: Option<u32>,
    /// 是否在宽限期后被强制结束
    pub forced: bool,
}

impl SpawnedProcess {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// 进程是否仍在运行
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// 发送终止信号，等待 `grace`，仍未退出则强制结束
    pub async fn terminate(mut self, grace: Duration) -> Result<Termination> {
        let pid = self.child.id();
        if !self.is_running() {
            return Ok(Termination { pid, forced: false });
        }

        request_exit(&mut self.child);

        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                debug!(label = %self.label, ?pid, status = ?status.ok(), "Process exited after terminate");
                Ok(Termination { pid, forced: false })
            }
            Err(_) => {
                warn!(label = %self.label, ?pid, "Process unresponsive, killing");
                self.child.kill().await?;
                Ok(Termination { pid, forced: true })
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    // 发送 SIGTERM
    if let Some(pid) = child.id() {
        let sent = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if sent {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    // 没有 SIGTERM，taskkill 不带 /F 会先请求窗口关闭
    if let Some(pid) = child.id() {
        let sent = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if sent {
            return;
        }
    }
    let _ = child.start_kill();
}
