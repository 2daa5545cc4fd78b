//! 依赖检查模块 - 校验 bot 文件并按需安装 Python 包
//!
//! 缺文件直接失败（安装无法修复缺失的 bot 脚本）。缺包时按两级策略安装：
//! 先从 requirements.txt 批量安装，批量失败再逐个安装剩余的包，最后统一复查。

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, LaunchEvent};
use crate::infra::python::{last_error_line, module_name, PythonRuntime};

/// 包管理能力
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// 包是否可以导入
    async fn is_installed(&self, package: &str) -> bool;

    /// 按清单批量安装
    async fn install_manifest(&self, manifest: &Path) -> Result<()>;

    /// 安装单个包
    async fn install(&self, package: &str) -> Result<()>;
}

/// 基于 pip 的包管理
pub struct PipPackageManager {
    python: PythonRuntime,
    working_dir: PathBuf,
}

impl PipPackageManager {
    pub fn new(python: PythonRuntime, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            python,
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl PackageManager for PipPackageManager {
    async fn is_installed(&self, package: &str) -> bool {
        let module = module_name(package);
        match self
            .python
            .run_inline("import importlib, sys; importlib.import_module(sys.argv[1])", &[&module])
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn install_manifest(&self, manifest: &Path) -> Result<()> {
        let manifest = manifest.to_string_lossy();
        let output = self
            .python
            .run_module("pip", &["install", "-r", &manifest], Some(&self.working_dir))
            .await?;
        if !output.status.success() {
            bail!(
                "pip install -r failed: {}",
                last_error_line(&output.stderr).unwrap_or_else(|| output.status.to_string())
            );
        }
        Ok(())
    }

    async fn install(&self, package: &str) -> Result<()> {
        let output = self
            .python
            .run_module("pip", &["install", package], Some(&self.working_dir))
            .await?;
        if !output.status.success() {
            bail!(
                "pip install {} failed: {}",
                package,
                last_error_line(&output.stderr).unwrap_or_else(|| output.status.to_string())
            );
        }
        Ok(())
    }
}

/// 安装阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// 按清单一次性安装；安装命令成功即视为阶段成功
    Manifest,
    /// 逐个安装剩余包；尽力而为，单个失败不会中断
    PerPackage,
}

impl InstallStage {
    /// 安装策略：按顺序执行，前一阶段成功则跳过后续阶段
    pub const POLICY: [InstallStage; 2] = [InstallStage::Manifest, InstallStage::PerPackage];
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStage::Manifest => write!(f, "manifest"),
            InstallStage::PerPackage => write!(f, "per-package"),
        }
    }
}

/// 依赖检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub missing_files: Vec<PathBuf>,
    pub missing_packages: Vec<String>,
    /// 是否执行过安装
    pub install_attempted: bool,
    /// 检查途中收到取消请求
    pub cancelled: bool,
}

impl DependencyReport {
    pub fn is_ready(&self) -> bool {
        self.missing_files.is_empty() && self.missing_packages.is_empty() && !self.cancelled
    }
}

/// 依赖解析器
pub struct DependencyResolver {
    packages: Arc<dyn PackageManager>,
    manifest: PathBuf,
    events: Arc<dyn EventSink>,
}

impl DependencyResolver {
    pub fn new(packages: Arc<dyn PackageManager>, manifest: impl Into<PathBuf>, events: Arc<dyn EventSink>) -> Self {
        Self {
            packages,
            manifest: manifest.into(),
            events,
        }
    }

    /// 校验文件和包，按需安装
    pub async fn ensure(
        &self,
        required_files: &[PathBuf],
        required_packages: &[String],
        auto_install: bool,
        cancel: &CancellationToken,
    ) -> DependencyReport {
        let mut report = DependencyReport {
            missing_files: required_files.iter().filter(|f| !f.exists()).cloned().collect(),
            ..Default::default()
        };
        if !report.missing_files.is_empty() {
            self.events.emit(LaunchEvent::MissingFiles {
                files: report.missing_files.clone(),
            });
            return report;
        }

        report.missing_packages = self.missing_packages(required_packages).await;
        if report.missing_packages.is_empty() || !auto_install {
            if !report.missing_packages.is_empty() {
                self.events.emit(LaunchEvent::MissingPackages {
                    packages: report.missing_packages.clone(),
                });
            }
            return report;
        }

        self.events.emit(LaunchEvent::MissingPackages {
            packages: report.missing_packages.clone(),
        });
        report.install_attempted = true;

        for stage in InstallStage::POLICY {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }
            self.events.emit(LaunchEvent::InstallStarted { stage });
            let stage_succeeded = match stage {
                InstallStage::Manifest => self.install_manifest().await,
                InstallStage::PerPackage => {
                    self.install_each(&report.missing_packages, cancel).await;
                    true
                }
            };
            if stage_succeeded {
                break;
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        report.missing_packages = self.missing_packages(required_packages).await;
        if !report.missing_packages.is_empty() {
            self.events.emit(LaunchEvent::MissingPackages {
                packages: report.missing_packages.clone(),
            });
        }
        report
    }

    async fn missing_packages(&self, packages: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for package in packages {
            if !self.packages.is_installed(package).await {
                missing.push(package.clone());
            }
        }
        missing
    }

    async fn install_manifest(&self) -> bool {
        match self.packages.install_manifest(&self.manifest).await {
            Ok(()) => true,
            Err(e) => {
                self.events.emit(LaunchEvent::InstallFailed {
                    stage: InstallStage::Manifest,
                    target: self.manifest.display().to_string(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    async fn install_each(&self, packages: &[String], cancel: &CancellationToken) {
        for package in packages {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.packages.install(package).await {
                self.events.emit(LaunchEvent::InstallFailed {
                    stage: InstallStage::PerPackage,
                    target: package.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
