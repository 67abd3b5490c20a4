//! Directory layout rooted at `CostrictDir`.
//!
//! ```text
//! <baseDir>/                     (CostrictDir, default ~/.costrict)
//! ├── bin/                       active artifacts on PATH
//! ├── package/                   staged + active package metadata and payloads
//! ├── share/                     system-spec.json, auth.json, .well-known.json
//! ├── cache/
//! │   ├── services/<name>.json
//! │   └── tunnels/<name>.json
//! ├── config/                    costrict.json
//! └── logs/
//! ```

use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Resolved `CostrictDir` root and its well-known subdirectories.
#[derive(Debug, Clone)]
pub struct CostrictDir {
    root: PathBuf,
}

impl CostrictDir {
    /// Resolves the root directory.
    ///
    /// Checks `$COSTRICT_HOME` first (must be absolute); otherwise falls
    /// back to `$HOME/.costrict` on POSIX or `%USERPROFILE%\.costrict` on
    /// Windows.
    pub fn resolve() -> CoreResult<Self> {
        if let Ok(custom) = std::env::var("COSTRICT_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(CoreError::HomeNotAbsolute(custom));
            }
            return Ok(Self { root: p });
        }

        let base = directories::BaseDirs::new().ok_or(CoreError::NoHomeDirectory)?;
        Ok(Self {
            root: base.home_dir().join(".costrict"),
        })
    }

    /// Builds a layout rooted at an explicit path (used by tests).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates every well-known subdirectory if missing.
    pub fn ensure(&self) -> CoreResult<()> {
        for dir in [
            self.bin_dir(),
            self.package_dir(),
            self.share_dir(),
            self.cache_services_dir(),
            self.cache_tunnels_dir(),
            self.config_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    #[must_use]
    pub fn package_dir(&self) -> PathBuf {
        self.root.join("package")
    }

    #[must_use]
    pub fn share_dir(&self) -> PathBuf {
        self.root.join("share")
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    #[must_use]
    pub fn cache_services_dir(&self) -> PathBuf {
        self.cache_dir().join("services")
    }

    #[must_use]
    pub fn cache_tunnels_dir(&self) -> PathBuf {
        self.cache_dir().join("tunnels")
    }

    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[must_use]
    pub fn app_config_path(&self) -> PathBuf {
        self.config_dir().join("costrict.json")
    }

    #[must_use]
    pub fn system_spec_path(&self) -> PathBuf {
        self.share_dir().join("system-spec.json")
    }

    #[must_use]
    pub fn auth_path(&self) -> PathBuf {
        self.share_dir().join("auth.json")
    }

    #[must_use]
    pub fn well_known_path(&self) -> PathBuf {
        self.share_dir().join(".well-known.json")
    }

    #[must_use]
    pub fn active_metadata_path(&self, package_name: &str) -> PathBuf {
        self.package_dir().join(format!("{package_name}.json"))
    }

    #[must_use]
    pub fn staged_metadata_path(&self, package_name: &str, version: &str) -> PathBuf {
        self.package_dir()
            .join(format!("{package_name}-{version}.json"))
    }

    #[must_use]
    pub fn staged_payload_dir(&self, version: &str) -> PathBuf {
        self.package_dir().join(version)
    }

    #[must_use]
    pub fn cache_service_path(&self, name: &str) -> PathBuf {
        self.cache_services_dir().join(format!("{name}.json"))
    }

    #[must_use]
    pub fn cache_tunnel_path(&self, name: &str) -> PathBuf {
        self.cache_tunnels_dir().join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn resolves_from_explicit_env_var() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("custom-home");
        // SAFETY: guarded by ENV_MUTEX, no other thread reads COSTRICT_HOME concurrently.
        unsafe {
            std::env::set_var("COSTRICT_HOME", &custom);
        }
        let dir = CostrictDir::resolve().unwrap();
        unsafe {
            std::env::remove_var("COSTRICT_HOME");
        }
        assert_eq!(dir.root(), custom.as_path());
    }

    #[test]
    fn rejects_relative_env_var() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: guarded by ENV_MUTEX.
        unsafe {
            std::env::set_var("COSTRICT_HOME", "relative/path");
        }
        let result = CostrictDir::resolve();
        unsafe {
            std::env::remove_var("COSTRICT_HOME");
        }
        assert!(matches!(result, Err(CoreError::HomeNotAbsolute(_))));
    }

    #[test]
    fn ensure_creates_every_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        assert!(dir.bin_dir().is_dir());
        assert!(dir.package_dir().is_dir());
        assert!(dir.share_dir().is_dir());
        assert!(dir.cache_services_dir().is_dir());
        assert!(dir.cache_tunnels_dir().is_dir());
        assert!(dir.config_dir().is_dir());
        assert!(dir.logs_dir().is_dir());
    }

    #[test]
    fn path_helpers_match_layout() {
        let dir = CostrictDir::from_path("/home/u/.costrict");
        assert_eq!(
            dir.active_metadata_path("demo"),
            PathBuf::from("/home/u/.costrict/package/demo.json")
        );
        assert_eq!(
            dir.staged_metadata_path("demo", "1.2.3"),
            PathBuf::from("/home/u/.costrict/package/demo-1.2.3.json")
        );
        assert_eq!(
            dir.staged_payload_dir("1.2.3"),
            PathBuf::from("/home/u/.costrict/package/1.2.3")
        );
    }
}
