//! `SystemSpecification`: fetched as a signed `system` package via the
//! package store, then loaded and cached in process-wide memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use costrict_store::PackageStore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Always,
    Once,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessible {
    Local,
    Remote,
}

/// `{ name, installDir? }`, shared shape for declared components and
/// conf-type configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpecification {
    pub name: String,
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
}

/// One declared service: spec → Process Instance (+ optional Tunnel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpecification {
    pub name: String,
    pub startup: Startup,
    /// `0` means "let the Port Pool pick".
    #[serde(default)]
    pub port: u16,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub metrics: Option<String>,
    #[serde(default)]
    pub healthy: Option<String>,
    pub accessible: Accessible,
}

/// `Manager.component` / `Manager.service`: describes the supervisor
/// itself as a component/service pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSpecification {
    pub component: ComponentSpecification,
    pub service: ServiceSpecification,
}

/// The full system specification, as fetched from the cloud repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSpecification {
    pub manager: ManagerSpecification,
    #[serde(default)]
    pub components: Vec<ComponentSpecification>,
    #[serde(default)]
    pub services: Vec<ServiceSpecification>,
    #[serde(default)]
    pub configurations: Vec<ComponentSpecification>,
}

/// Fetches, loads, and caches the `SystemSpecification`.
pub struct SystemSpecLoader {
    share_path: PathBuf,
    cached: Arc<RwLock<Option<SystemSpecification>>>,
}

impl SystemSpecLoader {
    #[must_use]
    pub fn new(share_path: PathBuf) -> Self {
        Self {
            share_path,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetches the signed `system` package via the package store into
    /// `<share>/system-spec.json`, activates it, then loads and caches
    /// it in memory. `install_dir` must be the directory containing
    /// `self.share_path` (the `system` package's metadata is expected to
    /// declare `fileName: "system-spec.json"` so activation writes
    /// exactly there).
    pub async fn fetch_and_load(
        &self,
        store: &PackageStore,
        install_dir: &Path,
    ) -> ConfigResult<SystemSpecification> {
        store
            .upgrade("system", install_dir, None, true, true)
            .await?;
        self.load_from_disk().await
    }

    /// Reads `self.share_path` directly without touching the store
    /// (used when the spec is already staged on disk).
    pub async fn load_from_disk(&self) -> ConfigResult<SystemSpecification> {
        let raw =
            tokio::fs::read_to_string(&self.share_path)
                .await
                .map_err(|e| ConfigError::Io {
                    path: self.share_path.display().to_string(),
                    cause: e.to_string(),
                })?;
        let spec: SystemSpecification =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Decode {
                path: self.share_path.display().to_string(),
                cause: e.to_string(),
            })?;
        *self.cached.write().await = Some(spec.clone());
        Ok(spec)
    }

    /// Returns the cached spec; requires a prior successful load.
    pub async fn spec(&self) -> ConfigResult<SystemSpecification> {
        self.cached
            .read()
            .await
            .clone()
            .ok_or(ConfigError::SpecNotLoaded)
    }
}
