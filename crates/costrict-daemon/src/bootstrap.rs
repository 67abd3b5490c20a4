//! Assembles every manager the daemon needs from on-disk configuration:
//! resolve the home directory, load configuration, construct the shared
//! long-lived services in dependency order, hand them to the RPC layer.

use std::sync::Arc;

use costrict_component::ComponentManager;
use costrict_config::{AppConfig, AuthStore, SystemSpecLoader};
use costrict_core::{CostrictDir, ProcessLister};
use costrict_repo::RepoClient;
use costrict_service::{ServiceManager, ServiceManagerConfig};
use costrict_store::PackageStore;
use costrict_supervisor::{Supervisor, SupervisorConfig};
use costrict_tunnel::TunnelManagerClient;
use tokio::sync::Mutex;
use tracing::info;

/// Everything [`crate::server`] needs to start handling RPC calls, plus
/// what `main` needs to run the background loops.
pub struct Bootstrap {
    pub dir: CostrictDir,
    pub app_config: AppConfig,
    pub components: Arc<ComponentManager>,
    pub services: Arc<ServiceManager>,
    pub supervisor: Arc<Supervisor>,
}

/// Derives the `{RemoteAddr}` template value from the tunnel manager's
/// URL: its host plus port (443 for `https`, 80 for `http`, as given
/// otherwise). Falls back to the raw URL if it doesn't parse, so a
/// malformed config still produces a (broken but non-panicking) tunnel
/// command rather than failing startup outright.
fn tunnel_host_addr(tunnel_manager_url: &str) -> String {
    let Ok(url) = url::Url::parse(tunnel_manager_url) else {
        return tunnel_manager_url.to_string();
    };
    let Some(host) = url.host_str() else {
        return tunnel_manager_url.to_string();
    };
    let port = url.port_or_known_default().unwrap_or(443);
    format!("{host}:{port}")
}

/// Resolves `$COSTRICT_HOME` (or its OS default), loads `costrict.json`,
/// fetches and loads the system specification, and wires up the
/// component/service/supervisor stack. Does not start anything running.
pub async fn assemble(
    dir_override: Option<CostrictDir>,
    lister: Arc<dyn ProcessLister>,
) -> anyhow::Result<Bootstrap> {
    let dir = match dir_override {
        Some(dir) => dir,
        None => CostrictDir::resolve()?,
    };
    dir.ensure()?;

    let app_config = AppConfig::load(&dir.app_config_path()).await?;
    info!(root = %dir.root().display(), "resolved costrict home");

    let repo = RepoClient::new(app_config.cloud_base_url.clone(), false)?;
    let store = Arc::new(PackageStore::new(
        dir.clone(),
        repo.clone(),
        app_config.package_public_key.clone(),
    ));

    // The "system" package's metadata declares `fileName: "system-spec.json"`
    // so activation lands it at exactly `dir.system_spec_path()`.
    let spec_loader = SystemSpecLoader::new(dir.system_spec_path());
    let system_spec = spec_loader
        .fetch_and_load(&store, &dir.share_dir())
        .await?;

    let auth = Arc::new(AuthStore::new(dir.auth_path()));

    let components = Arc::new(ComponentManager::new(
        dir.bin_dir(),
        store,
        repo,
        app_config.no_set_path,
        app_config.clean_cache,
        system_spec.components.clone(),
        system_spec.configurations.clone(),
    ));

    let services = Arc::new(ServiceManager::new(ServiceManagerConfig {
        dir: dir.clone(),
        port_pool: Arc::new(Mutex::new(costrict_core::PortPool::new(
            app_config.ports.min,
            app_config.ports.max,
        ))),
        components: components.clone(),
        tunnel_manager: TunnelManagerClient::new(app_config.tunnel_manager_url()),
        auth,
        tunnel_client_template: app_config.tunnel_client.clone(),
        remote_addr: tunnel_host_addr(&app_config.tunnel_manager_url()),
        lister: lister.clone(),
        daemonized: true,
        log_dir: app_config
            .log
            .dir
            .clone()
            .unwrap_or_else(|| dir.logs_dir())
            .display()
            .to_string(),
        log_level: app_config.log.level.clone(),
    }));

    let mut declared_component_names: Vec<String> =
        system_spec.components.iter().map(|c| c.name.clone()).collect();
    declared_component_names.push(system_spec.manager.component.name.clone());

    let supervisor = Arc::new(Supervisor::new(SupervisorConfig {
        dir: dir.clone(),
        components: components.clone(),
        services: services.clone(),
        lister,
        intervals: app_config.intervals,
        midnight: app_config.midnight,
        declared_component_names,
        self_pid: std::process::id(),
    }));

    supervisor
        .init(&system_spec.manager, system_spec.services.clone())
        .await?;

    Ok(Bootstrap {
        dir,
        app_config,
        components,
        services,
        supervisor,
    })
}
