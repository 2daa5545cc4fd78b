//! Python 运行时 - 定位解释器并执行内联脚本
//!
//! RLBot 框架、pip 和 rlbot_gui 都运行在同一个解释器里。

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Python 解释器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonRuntime {
    interpreter: PathBuf,
}

impl PythonRuntime {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// 优先使用显式指定的解释器，否则在 PATH 中查找
    pub fn detect(preferred: Option<&str>) -> Result<Self> {
        if let Some(path) = preferred {
            let resolved = which::which(path)
                .with_context(|| format!("configured python interpreter not found: {}", path))?;
            return Ok(Self::new(resolved));
        }

        ["python3", "python", "py"]
            .iter()
            .find_map(|candidate| which::which(candidate).ok())
            .map(Self::new)
            .ok_or_else(|| anyhow!("python interpreter not found on PATH (tried python3, python, py)"))
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// 构造以该解释器启动的命令
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// 执行 `python -c <code> args...` 并收集输出
    pub async fn run_inline(&self, code: &str, args: &[&str]) -> Result<Output> {
        debug!(interpreter = %self.interpreter.display(), "Running inline python");
        self.command()
            .arg("-c")
            .arg(code)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.interpreter.display()))
    }

    /// 执行 `python -m <module> args...` 并收集输出
    pub async fn run_module(&self, module: &str, args: &[&str], cwd: Option<&Path>) -> Result<Output> {
        let mut cmd = self.command();
        cmd.arg("-m")
            .arg(module)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.output()
            .await
            .with_context(|| format!("failed to run {} -m {}", self.interpreter.display(), module))
    }
}

/// pip 包名到 import 模块名（`rlgym-compat` → `rlgym_compat`）
pub fn module_name(package: &str) -> String {
    let base = package
        .split(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | ';') || c.is_whitespace())
        .next()
        .unwrap_or(package);
    base.trim().replace('-', "_").to_lowercase()
}

/// 截取 stderr 的最后一行非空内容，作为人类可读的失败原因
pub fn last_error_line(output: &[u8]) -> Option<String> {
    String::from_utf8_lossy(output)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
