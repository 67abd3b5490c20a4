//! Public snapshot and configuration types for a [`crate::ProcessInstance`].

use std::path::PathBuf;
use std::time::SystemTime;

/// Lifecycle state of a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Never started (or removed after a terminal `Remove`-adjacent op).
    NotStarted,
    Running,
    /// Stopped by the owner; terminal until `Start`/`Attach` is called again.
    Stopped,
    /// The child exited on its own, successfully.
    Exited,
    /// The child exited on its own, unsuccessfully, or was found dead on probe.
    Error,
}

/// Static identity and launch parameters for a process instance.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub title: String,
    /// OS-reported process name, used to validate `Attach`.
    pub process_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
}

/// A point-in-time snapshot of a process instance, used for `onChanged`
/// callbacks and for exposing process detail up through Service/well-known.
#[derive(Debug, Clone)]
pub struct ProcessDetail {
    pub title: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub start_time: Option<SystemTime>,
    pub last_exit_time: Option<SystemTime>,
    pub last_exit_reason: Option<String>,
}
