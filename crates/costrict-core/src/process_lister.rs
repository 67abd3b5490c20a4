//! The platform process-enumeration boundary.
//!
//! Platform-specific process enumeration is an external capability; this
//! module only defines the trait the supervisor and the excessive-process
//! detector call through, plus one concrete Unix implementation.

/// A running OS process as seen by a [`ProcessLister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsProcess {
    pub pid: u32,
    pub name: String,
}

/// Enumerates and probes OS processes by name or PID.
pub trait ProcessLister: Send + Sync {
    /// Lists every running process whose reported name matches `name`
    /// case-insensitively.
    fn list_by_name(&self, name: &str) -> Vec<OsProcess>;

    /// Returns the OS-reported name for `pid`, if it is currently alive.
    fn name_of(&self, pid: u32) -> Option<String>;

    /// Returns whether `pid` currently refers to a live process.
    fn is_alive(&self, pid: u32) -> bool {
        self.name_of(pid).is_some()
    }

    /// Terminates `pid`, best-effort. Used by the supervisor's startup
    /// stray-process sweep on startup; failures are not
    /// surfaced since the process may have already exited.
    fn kill(&self, pid: u32) {
        let _ = std::process::Command::new("kill")
            .arg("-9")
            .arg(pid.to_string())
            .status();
    }
}

/// Reads `/proc` for process enumeration. Linux-only; other Unixes and
/// Windows need their own implementation, which is out of scope here.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFsLister;

#[cfg(target_os = "linux")]
impl ProcFsLister {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn comm(pid: u32) -> Option<String> {
        let raw = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        Some(raw.trim().to_string())
    }
}

#[cfg(target_os = "linux")]
impl ProcessLister for ProcFsLister {
    fn list_by_name(&self, name: &str) -> Vec<OsProcess> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return found;
        };
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            if let Some(comm) = Self::comm(pid) {
                if comm.eq_ignore_ascii_case(name) {
                    found.push(OsProcess { pid, name: comm });
                }
            }
        }
        found
    }

    fn name_of(&self, pid: u32) -> Option<String> {
        Self::comm(pid)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn self_process_is_alive() {
        let lister = ProcFsLister::new();
        let pid = std::process::id();
        assert!(lister.is_alive(pid));
    }

    #[test]
    fn unknown_pid_is_not_alive() {
        let lister = ProcFsLister::new();
        assert!(!lister.is_alive(u32::MAX));
    }
}
