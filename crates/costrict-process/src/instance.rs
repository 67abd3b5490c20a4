//! A single supervised child process.
//!
//! State transitions (`Start`/`Attach`/`Stop`/watcher-observed exit) are
//! serialized under one lock per instance; the watcher task re-acquires
//! that lock before mutating state, never while blocked on the child's
//! exit.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use costrict_core::ProcessLister;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::types::{ProcessConfig, ProcessDetail, ProcessStatus};

/// Backoff before a watcher-scheduled restart attempt.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// How often an `Attach`ed (PID-only) watcher polls OS liveness, since
/// there is no `Child` handle to block on.
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `Healthy` / `Unavailable` outcome of `CheckProcess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unavailable,
}

/// Watcher configuration installed via [`ProcessInstance::set_watcher`].
#[derive(Clone)]
struct WatcherConfig {
    max_restart: u32,
    on_changed: Arc<dyn Fn(ProcessDetail) + Send + Sync>,
}

/// What owns the right to kill/await this instance's child right now.
enum ChildHandle {
    /// No watcher: the instance itself owns the `Child` and kills it
    /// directly on `Stop`.
    Unwatched(Child),
    /// A watcher task owns the `Child`; `Stop` signals it to kill and
    /// await instead.
    Watched { stop_tx: oneshot::Sender<()> },
}

struct Inner {
    config: ProcessConfig,
    status: ProcessStatus,
    pid: Option<u32>,
    restart_count: u32,
    start_time: Option<SystemTime>,
    last_exit_time: Option<SystemTime>,
    last_exit_reason: Option<String>,
    child: Option<ChildHandle>,
    watcher: Option<WatcherConfig>,
}

impl Inner {
    fn detail(&self) -> ProcessDetail {
        ProcessDetail {
            title: self.config.title.clone(),
            status: self.status,
            pid: self.pid,
            restart_count: self.restart_count,
            start_time: self.start_time,
            last_exit_time: self.last_exit_time,
            last_exit_reason: self.last_exit_reason.clone(),
        }
    }
}

/// A supervised child process. Cheaply cloneable; clones share the same
/// underlying state and lock.
#[derive(Clone)]
pub struct ProcessInstance(Arc<Mutex<Inner>>);

impl ProcessInstance {
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            config,
            status: ProcessStatus::NotStarted,
            pid: None,
            restart_count: 0,
            start_time: None,
            last_exit_time: None,
            last_exit_reason: None,
            child: None,
            watcher: None,
        })))
    }

    /// Installs a supervisor: when the child exits without `Stop`, and
    /// `restartCount < maxRestart`, a restart is scheduled after a 1 s
    /// backoff. `maxRestart = 0` means "never auto-restart". `onChanged`
    /// is invoked on every status transition.
    pub async fn set_watcher(
        &self,
        max_restart: u32,
        on_changed: impl Fn(ProcessDetail) + Send + Sync + 'static,
    ) {
        let mut inner = self.0.lock().await;
        inner.watcher = Some(WatcherConfig {
            max_restart,
            on_changed: Arc::new(on_changed),
        });
    }

    /// Replaces the command and arguments used by future `Start` calls,
    /// e.g. once a tunnel's template placeholders are resolved. Has no
    /// effect on an already-running child.
    pub async fn reconfigure(&self, command: String, args: Vec<String>) {
        let mut inner = self.0.lock().await;
        inner.config.command = command;
        inner.config.args = args;
    }

    /// Starts the child. A no-op returning success if already `Running`.
    pub async fn start(&self) -> ProcessResult<()> {
        let mut inner = self.0.lock().await;
        if inner.status == ProcessStatus::Running {
            return Ok(());
        }

        let watcher = inner.watcher.clone();
        let mut cmd = Command::new(&inner.config.command);
        cmd.args(&inner.config.args);
        if let Some(dir) = &inner.config.work_dir {
            cmd.current_dir(dir);
        }
        if watcher.is_none() {
            // No watcher: let the child outlive us by joining a new
            // process group instead of our own.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::StartFailed {
            title: inner.config.title.clone(),
            cause: e.to_string(),
        })?;
        let pid = child.id();

        inner.status = ProcessStatus::Running;
        inner.pid = pid;
        inner.start_time = Some(SystemTime::now());
        inner.last_exit_time = None;
        inner.last_exit_reason = None;

        if let Some(watcher) = watcher {
            let (stop_tx, stop_rx) = oneshot::channel();
            inner.child = Some(ChildHandle::Watched { stop_tx });
            drop(inner);
            let handle = self.clone();
            tokio::spawn(async move { handle.run_watcher(child, stop_rx, watcher).await });
        } else {
            inner.child = Some(ChildHandle::Unwatched(child));
        }

        info!(title = %self.title_sync(), pid, "process started");
        Ok(())
    }

    fn title_sync(&self) -> String {
        // Best-effort synchronous peek for log lines; never blocks since
        // the lock is only briefly held elsewhere on the happy path.
        match self.0.try_lock() {
            Ok(inner) => inner.config.title.clone(),
            Err(_) => String::new(),
        }
    }

    /// Adopts an already-running OS process by PID, accepting it only if
    /// the OS-reported process name matches case-insensitively.
    pub async fn attach(&self, pid: u32, lister: Arc<dyn ProcessLister>) -> ProcessResult<()> {
        let mut inner = self.0.lock().await;
        let found = lister.name_of(pid);
        let matches = found
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(&inner.config.process_name));
        if !matches {
            return Err(ProcessError::AttachNameMismatch {
                pid,
                expected: inner.config.process_name.clone(),
                found,
            });
        }

        inner.status = ProcessStatus::Running;
        inner.pid = Some(pid);
        inner.start_time = Some(SystemTime::now());
        let watcher = inner.watcher.clone();
        drop(inner);

        if let Some(watcher) = watcher {
            let handle = self.clone();
            tokio::spawn(async move { handle.run_attach_watcher(pid, lister, watcher).await });
        }

        info!(pid, "process attached");
        Ok(())
    }

    /// Stops the child. Idempotent if already non-`Running`.
    pub async fn stop(&self) -> ProcessResult<()> {
        let mut inner = self.0.lock().await;
        if inner.status != ProcessStatus::Running {
            inner.status = ProcessStatus::Stopped;
            return Ok(());
        }
        inner.status = ProcessStatus::Stopped;
        let child = inner.child.take();
        // The watched path clears `pid` itself once the watcher task
        // observes the exit; the unwatched path has no such observer, so
        // clear it here or a stale PID would linger in the next cache save.
        let unwatched = matches!(child, Some(ChildHandle::Unwatched(_)));
        if unwatched {
            inner.pid = None;
        }
        drop(inner);

        match child {
            Some(ChildHandle::Unwatched(mut child)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            Some(ChildHandle::Watched { stop_tx }) => {
                let _ = stop_tx.send(());
            }
            None => {}
        }
        Ok(())
    }

    /// Probes liveness. Transitions to `Error` on a negative probe.
    pub async fn check_process(&self, lister: &dyn ProcessLister) -> Health {
        let mut inner = self.0.lock().await;
        if inner.status != ProcessStatus::Running {
            return Health::Unavailable;
        }
        let alive = inner.pid.is_some_and(|pid| lister.is_alive(pid));
        if alive {
            Health::Healthy
        } else {
            inner.status = ProcessStatus::Error;
            Health::Unavailable
        }
    }

    #[must_use]
    pub async fn detail(&self) -> ProcessDetail {
        self.0.lock().await.detail()
    }

    async fn run_watcher(
        &self,
        mut child: Child,
        mut stop_rx: oneshot::Receiver<()>,
        watcher: WatcherConfig,
    ) {
        enum Outcome {
            Stopped,
            Exited(std::io::Result<std::process::ExitStatus>),
        }

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = &mut stop_rx => {
                let _ = child.start_kill();
                Outcome::Exited(child.wait().await)
            }
        };
        let stopped_by_user = matches!(outcome, Outcome::Stopped);

        let mut inner = self.0.lock().await;
        inner.child = None;
        inner.pid = None;
        inner.last_exit_time = Some(SystemTime::now());

        if stopped_by_user || inner.status == ProcessStatus::Stopped {
            inner.last_exit_reason = Some("stopped".to_string());
            let detail = inner.detail();
            drop(inner);
            (watcher.on_changed)(detail);
            return;
        }

        let Outcome::Exited(status) = outcome else {
            unreachable!()
        };
        let success = matches!(&status, Ok(s) if s.success());
        inner.status = if success {
            ProcessStatus::Exited
        } else {
            ProcessStatus::Error
        };
        inner.last_exit_reason = Some(match status {
            Ok(s) => s.to_string(),
            Err(e) => e.to_string(),
        });

        let should_restart = inner.restart_count < watcher.max_restart;
        if should_restart {
            inner.restart_count += 1;
        }
        let detail = inner.detail();
        drop(inner);

        (watcher.on_changed)(detail);

        if should_restart {
            tokio::time::sleep(RESTART_BACKOFF).await;
            let still_eligible = {
                let inner = self.0.lock().await;
                inner.status != ProcessStatus::Stopped
            };
            if still_eligible {
                if let Err(e) = self.start().await {
                    warn!(error = %e, "watcher restart attempt failed");
                }
            }
        }
    }

    async fn run_attach_watcher(
        &self,
        pid: u32,
        lister: Arc<dyn ProcessLister>,
        watcher: WatcherConfig,
    ) {
        loop {
            tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
            let mut inner = self.0.lock().await;
            if inner.status != ProcessStatus::Running {
                return;
            }
            if lister.is_alive(pid) {
                continue;
            }

            inner.child = None;
            inner.pid = None;
            inner.status = ProcessStatus::Error;
            inner.last_exit_time = Some(SystemTime::now());
            inner.last_exit_reason = Some("process no longer present".to_string());
            let should_restart = inner.restart_count < watcher.max_restart;
            if should_restart {
                inner.restart_count += 1;
            }
            let detail = inner.detail();
            drop(inner);

            (watcher.on_changed)(detail);

            if should_restart {
                tokio::time::sleep(RESTART_BACKOFF).await;
                let still_eligible = {
                    let inner = self.0.lock().await;
                    inner.status != ProcessStatus::Stopped
                };
                if still_eligible {
                    if let Err(e) = self.start().await {
                        warn!(error = %e, "watcher restart attempt failed after attach loss");
                    }
                }
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costrict_core::{OsProcess, ProcessLister as _};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg(command: &str, args: &[&str]) -> ProcessConfig {
        ProcessConfig {
            title: "test".to_string(),
            process_name: command.to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            work_dir: None,
        }
    }

    struct FakeLister {
        alive: std::sync::Mutex<std::collections::HashSet<u32>>,
    }

    impl costrict_core::ProcessLister for FakeLister {
        fn list_by_name(&self, _name: &str) -> Vec<OsProcess> {
            Vec::new()
        }
        fn name_of(&self, pid: u32) -> Option<String> {
            if self.alive.lock().unwrap().contains(&pid) {
                Some("demo".to_string())
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let proc = ProcessInstance::new(cfg("sleep", &["5"]));
        proc.start().await.unwrap();
        proc.start().await.unwrap();
        let detail = proc.detail().await;
        assert_eq!(detail.status, ProcessStatus::Running);
        proc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let proc = ProcessInstance::new(cfg("sleep", &["5"]));
        proc.start().await.unwrap();
        proc.stop().await.unwrap();
        proc.stop().await.unwrap();
        let detail = proc.detail().await;
        assert_eq!(detail.status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn watcher_restarts_within_budget_then_stops() {
        let changes = Arc::new(AtomicU32::new(0));
        let changes2 = changes.clone();
        let proc = ProcessInstance::new(cfg("false", &[]));
        proc.set_watcher(2, move |_detail| {
            changes2.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        proc.start().await.unwrap();

        // Each failed run: 0s exit + 1s backoff. Budget = 2 restarts, so
        // three total runs before giving up.
        tokio::time::sleep(Duration::from_millis(2600)).await;

        let detail = proc.detail().await;
        assert_eq!(detail.status, ProcessStatus::Error);
        assert_eq!(detail.restart_count, 2);
        assert!(changes.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn max_restart_zero_never_restarts() {
        let proc = ProcessInstance::new(cfg("false", &[]));
        proc.set_watcher(0, |_| {}).await;
        proc.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let detail = proc.detail().await;
        assert_eq!(detail.status, ProcessStatus::Error);
        assert_eq!(detail.restart_count, 0);
    }

    #[tokio::test]
    async fn attach_rejects_name_mismatch() {
        let lister: Arc<dyn costrict_core::ProcessLister> = Arc::new(FakeLister {
            alive: std::sync::Mutex::new(std::collections::HashSet::from([42])),
        });
        let proc = ProcessInstance::new(cfg("other-name", &[]));
        let err = proc.attach(42, lister).await.unwrap_err();
        assert!(matches!(err, ProcessError::AttachNameMismatch { .. }));
    }

    #[tokio::test]
    async fn attach_accepts_matching_name_case_insensitive() {
        let lister: Arc<dyn costrict_core::ProcessLister> = Arc::new(FakeLister {
            alive: std::sync::Mutex::new(std::collections::HashSet::from([42])),
        });
        let proc = ProcessInstance::new(cfg("DEMO", &[]));
        proc.attach(42, lister).await.unwrap();
        let detail = proc.detail().await;
        assert_eq!(detail.status, ProcessStatus::Running);
        assert_eq!(detail.pid, Some(42));
    }

    #[tokio::test]
    async fn check_process_unavailable_when_not_running() {
        let lister = FakeLister {
            alive: std::sync::Mutex::new(std::collections::HashSet::new()),
        };
        let proc = ProcessInstance::new(cfg("sleep", &["5"]));
        assert_eq!(proc.check_process(&lister).await, Health::Unavailable);
    }
}
