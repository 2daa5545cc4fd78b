//! 基础设施层 - 进程、Python 运行时、外部进程句柄

pub mod process;
pub mod python;
pub mod spawned;

pub use process::{ProcessInfo, ProcessScanner, ProcessSource, ProcessWatcher, WaitOutcome};
pub use python::PythonRuntime;
pub use spawned::{SpawnedProcess, Termination};
