//! Per-declared-component lifecycle: `Init`, `Upgrade`, `Remove`,
//! `UpgradeAll`, `CheckComponents`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use costrict_config::ComponentSpecification;
use costrict_core::VersionNumber;
use costrict_repo::{PackageMetadata, RepoClient};
use costrict_store::PackageStore;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{ComponentError, ComponentResult};
use crate::types::ComponentDetail;

struct Entry {
    spec: ComponentSpecification,
    local: Option<PackageMetadata>,
    remote_newest: Option<VersionNumber>,
    installed: bool,
    need_upgrade: bool,
    is_config: bool,
}

impl Entry {
    fn detail(&self, name: &str) -> ComponentDetail {
        ComponentDetail {
            name: name.to_string(),
            spec: self.spec.clone(),
            installed: self.installed,
            local_version: self.local.as_ref().map(|m| m.version_id),
            remote_newest: self.remote_newest,
            need_upgrade: self.need_upgrade,
            is_config: self.is_config,
        }
    }
}

/// Per-component version tracking, upgrade, and removal, backed by a
/// [`PackageStore`] and [`RepoClient`].
pub struct ComponentManager {
    default_install_dir: PathBuf,
    store: Arc<PackageStore>,
    repo: RepoClient,
    no_set_path: bool,
    clean_cache: bool,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ComponentManager {
    /// `components` are exec-type packages from the system spec's
    /// `Components` list; `configurations` are conf-type packages from
    /// its `Configurations` list (spec.md §2/§3 C7). Both are tracked
    /// identically by `Init`/`Upgrade`/`UpgradeAll`/`CheckComponents`;
    /// `is_config` on the resulting [`ComponentDetail`] distinguishes
    /// them for callers that need to (e.g. C11 "list components"'
    /// `includeConfig`).
    #[must_use]
    pub fn new(
        default_install_dir: PathBuf,
        store: Arc<PackageStore>,
        repo: RepoClient,
        no_set_path: bool,
        clean_cache: bool,
        components: Vec<ComponentSpecification>,
        configurations: Vec<ComponentSpecification>,
    ) -> Self {
        let make_entries = |specs: Vec<ComponentSpecification>, is_config: bool| {
            specs.into_iter().map(move |spec| {
                (
                    spec.name.clone(),
                    Entry {
                        spec,
                        local: None,
                        remote_newest: None,
                        installed: false,
                        need_upgrade: false,
                        is_config,
                    },
                )
            })
        };
        let entries = make_entries(components, false)
            .chain(make_entries(configurations, true))
            .collect();
        Self {
            default_install_dir,
            store,
            repo,
            no_set_path,
            clean_cache,
            entries: RwLock::new(entries),
        }
    }

    fn install_dir_for(&self, spec: &ComponentSpecification) -> PathBuf {
        spec.install_dir
            .clone()
            .unwrap_or_else(|| self.default_install_dir.clone())
    }

    async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// For every declared component: load local metadata and fetch the
    /// remote newest version, setting `installed`/`needUpgrade`.
    async fn fetch_info(&self, name: &str) -> ComponentResult<()> {
        let spec = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .map(|e| e.spec.clone())
                .ok_or_else(|| ComponentError::ComponentNotFound(name.to_string()))?
        };

        let local = self.store.active_metadata(name)?;
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let platform = self.repo.platform_info(name, os, arch).await?;

        let need_upgrade = match local.as_ref() {
            Some(l) => l.version_id.compare(&platform.newest.version_id) == Ordering::Less,
            None => true,
        };

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.installed = local.is_some();
            entry.local = local;
            entry.remote_newest = Some(platform.newest.version_id);
            entry.need_upgrade = need_upgrade;
        }
        let _ = spec;
        Ok(())
    }

    /// Refreshes every declared component and configuration. Per-name
    /// failures are logged and do not abort the remaining refreshes.
    pub async fn init(&self) {
        for name in self.names().await {
            if let Err(e) = self.fetch_info(&name).await {
                warn!(component = name, error = %e, "failed to fetch component info during init");
            }
        }
    }

    /// `Upgrade(name)`. No-op success if already up to date.
    pub async fn upgrade(&self, name: &str) -> ComponentResult<bool> {
        let (install_dir, need_upgrade) = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| ComponentError::ComponentNotFound(name.to_string()))?;
            (self.install_dir_for(&entry.spec), entry.need_upgrade)
        };
        if !need_upgrade {
            return Ok(false);
        }

        let (_, upgraded) = self
            .store
            .upgrade(name, &install_dir, None, self.no_set_path, self.clean_cache)
            .await?;
        self.fetch_info(name).await?;
        Ok(upgraded)
    }

    /// `Remove(name)`. Forbidden if not installed.
    pub async fn remove(&self, name: &str) -> ComponentResult<()> {
        let install_dir = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| ComponentError::ComponentNotFound(name.to_string()))?;
            if !entry.installed {
                return Err(ComponentError::NotInstalled(name.to_string()));
            }
            self.install_dir_for(&entry.spec)
        };

        self.store.remove(name, &install_dir).await?;

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.installed = false;
            entry.need_upgrade = false;
            entry.local = None;
        }
        Ok(())
    }

    /// Iterates every component, skipping (and logging) failures, then
    /// prunes stale staged versions.
    pub async fn upgrade_all(&self) -> ComponentResult<()> {
        for name in self.names().await {
            if let Err(e) = self.upgrade(&name).await {
                warn!(component = name, error = %e, "upgrade failed during UpgradeAll");
            }
        }
        self.store.cleanup_old_versions().await?;
        Ok(())
    }

    /// Refreshes all components; returns the count that currently need
    /// an upgrade.
    pub async fn check_components(&self) -> usize {
        self.init().await;
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.need_upgrade)
            .count()
    }

    /// A stable, name-sorted snapshot of every declared component.
    pub async fn list(&self) -> Vec<ComponentDetail> {
        let entries = self.entries.read().await;
        let mut out: Vec<ComponentDetail> = entries
            .iter()
            .map(|(name, entry)| entry.detail(name))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn detail(&self, name: &str) -> ComponentResult<ComponentDetail> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|e| e.detail(name))
            .ok_or_else(|| ComponentError::ComponentNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costrict_core::CostrictDir;
    use costrict_repo::RepoClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(name: &str) -> ComponentSpecification {
        ComponentSpecification {
            name: name.to_string(),
            install_dir: None,
        }
    }

    async fn platform_mock(server: &MockServer, name: &str, newest: &str) {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        Mock::given(method("GET"))
            .and(path(format!("/{name}/{os}/{arch}/platform.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "packageName": name,
                "os": os,
                "arch": arch,
                "newest": { "versionId": newest, "appUrl": "/a", "infoUrl": "/i" },
                "versions": [{ "versionId": newest, "appUrl": "/a", "infoUrl": "/i" }],
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn init_marks_uninstalled_component_as_needing_upgrade() {
        let server = MockServer::start().await;
        platform_mock(&server, "demo", "1.0.0").await;

        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        let repo = RepoClient::new(server.uri(), false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));

        let manager = ComponentManager::new(
            dir.bin_dir(),
            store,
            repo,
            false,
            true,
            vec![spec("demo")],
            vec![],
        );
        manager.init().await;

        let detail = manager.detail("demo").await.unwrap();
        assert!(!detail.installed);
        assert!(detail.need_upgrade);
        assert_eq!(
            detail.remote_newest,
            Some(costrict_core::VersionNumber::new(1, 0, 0))
        );
    }

    #[tokio::test]
    async fn unknown_component_is_not_found() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        let repo = RepoClient::new(server.uri(), false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));
        let manager = ComponentManager::new(dir.bin_dir(), store, repo, false, true, vec![], vec![]);

        let err = manager.upgrade("ghost").await.unwrap_err();
        assert!(matches!(err, ComponentError::ComponentNotFound(_)));
    }

    #[tokio::test]
    async fn remove_forbidden_when_not_installed() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        let repo = RepoClient::new(server.uri(), false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));
        let manager = ComponentManager::new(
            dir.bin_dir(),
            store,
            repo,
            false,
            true,
            vec![spec("demo")],
            vec![],
        );

        let err = manager.remove("demo").await.unwrap_err();
        assert!(matches!(err, ComponentError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn init_covers_declared_configurations_too() {
        let server = MockServer::start().await;
        platform_mock(&server, "demo", "1.0.0").await;
        platform_mock(&server, "demo-conf", "2.0.0").await;

        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        let repo = RepoClient::new(server.uri(), false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));

        let manager = ComponentManager::new(
            dir.bin_dir(),
            store,
            repo,
            false,
            true,
            vec![spec("demo")],
            vec![spec("demo-conf")],
        );
        assert_eq!(manager.check_components().await, 2);

        let component = manager.detail("demo").await.unwrap();
        assert!(!component.is_config);
        let configuration = manager.detail("demo-conf").await.unwrap();
        assert!(configuration.is_config);
        assert!(configuration.need_upgrade);

        let names: Vec<String> = manager.list().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["demo", "demo-conf"]);
    }
}
