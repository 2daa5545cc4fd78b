// src/cli/processes.rs
//! Processes 命令 - 列出正在运行的宿主进程

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

use crate::infra::process::ProcessWatcher;
use crate::settings::LauncherSettings;

/// 处理 processes 命令
pub fn handle_processes(json: bool, settings: Option<&Path>) -> Result<()> {
    let settings = settings
        .map(LauncherSettings::load_from)
        .unwrap_or_else(LauncherSettings::load);
    let names: HashSet<String> = settings.host_process_names.iter().cloned().collect();

    let processes = ProcessWatcher::system().list_matching(&names);

    if json {
        println!("{}", serde_json::to_string_pretty(&processes)?);
        return Ok(());
    }

    if processes.is_empty() {
        println!("未发现宿主进程 (查找: {})", settings.host_process_names.join(", "));
        return Ok(());
    }

    println!("发现 {} 个宿主进程:\n", processes.len());
    for process in processes {
        let path = process
            .executable_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  PID: {} | 名称: {} | 启动时间: {} | 路径: {}",
            process.pid,
            process.name,
            process.created_at.format("%Y-%m-%d %H:%M:%S"),
            path
        );
    }
    Ok(())
}
