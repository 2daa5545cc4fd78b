//! 运行监控 - 定期检查宿主进程是否仍然存在
//!
//! 只上报告警，不修改编排器状态。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::descriptor::LaunchMode;
use crate::events::{EventSink, LaunchEvent};
use crate::infra::process::ProcessWatcher;
use crate::orchestrator::{OrchestratorState, StateCell};

pub struct Monitor {
    watcher: Arc<ProcessWatcher>,
    names: HashSet<String>,
    interval: Duration,
    mode: LaunchMode,
    events: Arc<dyn EventSink>,
    state: Arc<StateCell>,
}

impl Monitor {
    pub fn new(
        watcher: Arc<ProcessWatcher>,
        names: HashSet<String>,
        interval: Duration,
        mode: LaunchMode,
        events: Arc<dyn EventSink>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            watcher,
            names,
            interval,
            mode,
            events,
            state,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// 直到取消或状态离开 Running
    pub async fn run(self, cancel: CancellationToken) {
        debug!(interval_secs = self.interval.as_secs(), mode = %self.mode, "Monitor started");
        let mut lost = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            if self.state.get() != OrchestratorState::Running {
                break;
            }

            if self.watcher.is_any_running(&self.names) {
                if lost {
                    lost = false;
                    self.events.emit(LaunchEvent::HostProcessRecovered);
                }
            } else {
                lost = true;
                self.events.emit(LaunchEvent::HostProcessLost { mode: self.mode });
            }
        }

        debug!("Monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::infra::process::{ProcessInfo, ProcessSource};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ToggleSource(Arc<AtomicBool>);

    impl ProcessSource for ToggleSource {
        fn snapshot(&self) -> Vec<ProcessInfo> {
            if !self.0.load(Ordering::SeqCst) {
                return Vec::new();
            }
            vec![ProcessInfo {
                pid: 42,
                name: "RocketLeague.exe".to_string(),
                executable_path: None,
                created_at: Utc::now(),
            }]
        }
    }

    fn setup(present: bool) -> (Monitor, Arc<AtomicBool>, Arc<MemorySink>, Arc<StateCell>) {
        let flag = Arc::new(AtomicBool::new(present));
        let sink = MemorySink::new();
        let state = Arc::new(StateCell::new(sink.clone()));
        state.advance(OrchestratorState::Running);
        let monitor = Monitor::new(
            Arc::new(ProcessWatcher::new(Box::new(ToggleSource(flag.clone())))),
            HashSet::from(["RocketLeague.exe".to_string()]),
            Duration::from_secs(5),
            LaunchMode::OnlineAttach,
            sink.clone(),
            state.clone(),
        );
        (monitor, flag, sink, state)
    }

    fn lost_count(sink: &MemorySink) -> usize {
        sink.count(|e| matches!(e, LaunchEvent::HostProcessLost { .. }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_is_reported_every_tick() {
        let (monitor, _flag, sink, state) = setup(false);
        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());

        sleep(Duration::from_secs(16)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(lost_count(&sink), 3);
        assert!(sink.events().contains(&LaunchEvent::HostProcessLost {
            mode: LaunchMode::OnlineAttach
        }));
        // 告警不改变状态
        assert_eq!(state.get(), OrchestratorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reported_once() {
        let (monitor, flag, sink, _state) = setup(false);
        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());

        sleep(Duration::from_secs(6)).await;
        flag.store(true, Ordering::SeqCst);
        sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(lost_count(&sink), 1);
        assert_eq!(sink.count(|e| matches!(e, LaunchEvent::HostProcessRecovered)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_state_leaves_running() {
        let (monitor, _flag, sink, state) = setup(true);
        let handle = monitor.spawn(CancellationToken::new());

        state.advance(OrchestratorState::Stopping);
        tokio::time::timeout(Duration::from_secs(6), handle)
            .await
            .expect("monitor should exit after one tick")
            .unwrap();

        assert_eq!(lost_count(&sink), 0);
    }
}
