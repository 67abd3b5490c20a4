//! Orchestrates every declared [`ServiceInstance`]: startup, shutdown,
//! health, recovery, and the well-known export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use costrict_component::ComponentManager;
use costrict_config::{
    Accessible, AuthStore, ManagerSpecification, ServiceSpecification, Startup,
    TunnelClientTemplate,
};
use costrict_core::{CostrictDir, PortPool, ProcessLister};
use costrict_process::Health;
use costrict_tunnel::{TunnelConfig, TunnelInstance, TunnelManagerClient};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::instance::ServiceInstance;
use crate::template;
use crate::types::{ServiceDetail, ServiceHealth, ServiceKnowledge, ServiceStatus, WellKnownFile, WellKnownLogs};

/// Restart budget for a daemonized `startup=always` service's process
/// watcher.
const SERVICE_MAX_RESTART: u32 = 3;
/// Consecutive failed port probes before `CheckService` gives up on a
/// service and reports it `Unavailable`.
const PORT_FAILURE_THRESHOLD: u32 = 3;
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

fn basename(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| command.to_string())
}

/// Construction parameters, grouped so `ServiceManager::new` doesn't take
/// a dozen positional arguments.
pub struct ServiceManagerConfig {
    pub dir: CostrictDir,
    pub port_pool: Arc<Mutex<PortPool>>,
    pub components: Arc<ComponentManager>,
    pub tunnel_manager: TunnelManagerClient,
    pub auth: Arc<AuthStore>,
    pub tunnel_client_template: TunnelClientTemplate,
    pub remote_addr: String,
    pub lister: Arc<dyn ProcessLister>,
    pub daemonized: bool,
    pub log_dir: String,
    pub log_level: String,
}

/// Owns every declared [`ServiceInstance`] plus the shared resources
/// (port pool, component manager, tunnel manager client, auth) needed to
/// start, stop, check, and recover them.
pub struct ServiceManager {
    dir: CostrictDir,
    port_pool: Arc<Mutex<PortPool>>,
    components: Arc<ComponentManager>,
    tunnel_manager: TunnelManagerClient,
    auth: Arc<AuthStore>,
    tunnel_client_template: TunnelClientTemplate,
    remote_addr: String,
    lister: Arc<dyn ProcessLister>,
    daemonized: bool,
    log_dir: String,
    log_level: String,
    entries: RwLock<HashMap<String, ServiceInstance>>,
}

impl ServiceManager {
    #[must_use]
    pub fn new(config: ServiceManagerConfig) -> Self {
        Self {
            dir: config.dir,
            port_pool: config.port_pool,
            components: config.components,
            tunnel_manager: config.tunnel_manager,
            auth: config.auth,
            tunnel_client_template: config.tunnel_client_template,
            remote_addr: config.remote_addr,
            lister: config.lister,
            daemonized: config.daemonized,
            log_dir: config.log_dir,
            log_level: config.log_level,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn instance(&self, name: &str) -> ServiceResult<ServiceInstance> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::ServiceNotFound(name.to_string()))
    }

    /// Registers the "self" service from `Manager.service`/`Manager.component`,
    /// then every declared service. A service declared with `startup=always`
    /// must bind to an already-declared component of the same name; any
    /// other service is registered without that check (it may be started
    /// manually later, once its component exists).
    pub async fn init(
        &self,
        manager_spec: &ManagerSpecification,
        services: Vec<ServiceSpecification>,
    ) -> ServiceResult<()> {
        let self_name = manager_spec.service.name.clone();
        let self_cache = self.dir.cache_service_path(&self_name);
        let self_instance = ServiceInstance::new(
            manager_spec.service.clone(),
            manager_spec.component.name.clone(),
            false,
            self_cache,
        );
        self.entries
            .write()
            .await
            .insert(self_name, self_instance);

        for spec in services {
            if spec.startup == Startup::Always {
                self.components
                    .detail(&spec.name)
                    .await
                    .map_err(|_| ServiceError::ComponentNotFound(spec.name.clone()))?;
            }
            let cache_path = self.dir.cache_service_path(&spec.name);
            let component_name = spec.name.clone();
            let name = spec.name.clone();
            let instance = ServiceInstance::new(spec, component_name, true, cache_path);
            self.entries.write().await.insert(name, instance);
        }
        Ok(())
    }

    async fn names_with_startup(&self, startup: Startup) -> Vec<String> {
        self.entries
            .read()
            .await
            .values()
            .filter(|i| i.spec().startup == startup)
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Allocates a port, expands the service's command/args template,
    /// starts its process (with a restart watcher if daemonized and
    /// `startup=always`), opens a tunnel if `accessible=remote`, and
    /// persists the cache.
    pub async fn start_service(&self, name: &str) -> ServiceResult<()> {
        let instance = self.instance(name).await?;
        let spec = instance.spec().clone();

        let port = {
            let mut pool = self.port_pool.lock().await;
            pool.alloc(spec.port).await?
        };

        let command = template::expand(&spec.command, &spec.name, port);
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|a| template::expand(a, &spec.name, port))
            .collect();
        instance.process().reconfigure(command, args).await;

        if self.daemonized && spec.startup == Startup::Always {
            let handle = instance.clone();
            instance
                .process()
                .set_watcher(SERVICE_MAX_RESTART, move |detail| {
                    let handle = handle.clone();
                    let status = match detail.status {
                        costrict_process::ProcessStatus::Running => ServiceStatus::Running,
                        costrict_process::ProcessStatus::Stopped => ServiceStatus::Stopped,
                        _ => ServiceStatus::Error,
                    };
                    tokio::spawn(async move {
                        handle.set_status(status).await;
                        if let Err(e) = handle.save_cache().await {
                            warn!(error = %e, "failed to save service cache after process transition");
                        }
                    });
                })
                .await;
        }

        // A supervisor restart leaves a cached PID behind; re-attach to
        // the still-running child instead of spawning a duplicate
        // (Entity lifetimes: Running is entered by `Start`
        // OR `Attach`).
        let reattached = match instance.load_cached_pid().await {
            Some(pid) => instance
                .process()
                .attach(pid, self.lister.clone())
                .await
                .is_ok(),
            None => false,
        };
        if !reattached {
            if let Err(e) = instance.process().start().await {
                instance.set_status(ServiceStatus::Error).await;
                return Err(e.into());
            }
        }
        instance.set_started(port).await;

        if spec.accessible == Accessible::Remote {
            let identity = self.auth.identity().await?;
            let tunnel_cache_path = self.dir.cache_tunnel_path(&spec.name);
            let tunnel_config = TunnelConfig {
                name: spec.name.clone(),
                app_name: spec.name.clone(),
                client_id: identity.machine_id,
                local_port: port,
                command: self.tunnel_client_template.command.clone(),
                args: self.tunnel_client_template.args.clone(),
                process_name: basename(&self.tunnel_client_template.command),
                remote_addr: self.remote_addr.clone(),
            };
            let tunnel = TunnelInstance::new(tunnel_config, tunnel_cache_path, self.tunnel_manager.clone());
            let tunnel_reattached = tunnel
                .reload_and_attach(self.lister.clone(), self.daemonized)
                .await
                .unwrap_or(false);
            if !tunnel_reattached {
                let auth_header = self.auth.auth_header().await?;
                tunnel.open(self.daemonized, &auth_header).await?;
            }
            instance.set_tunnel(tunnel).await;
        }

        instance.save_cache().await?;
        info!(name, port, "service started");
        Ok(())
    }

    /// Stops the process, closes any tunnel, frees the port back to the
    /// pool, and persists the cache. Idempotent.
    pub async fn stop_service(&self, name: &str) -> ServiceResult<()> {
        let instance = self.instance(name).await?;
        instance.set_status(ServiceStatus::Stopped).await;
        instance.process().stop().await?;
        if let Some(tunnel) = instance.tunnel().await {
            tunnel.close().await?;
        }
        let port = instance.port().await;
        if port != 0 {
            self.port_pool.lock().await.free(port);
        }
        instance.save_cache().await?;
        Ok(())
    }

    /// `Unavailable` unless `Running`; then a port probe (three
    /// consecutive failures escalate to `Unavailable`), a process
    /// liveness check (`Unavailable` on failure), and a tunnel health
    /// check (`Incomplete` on failure); otherwise `Healthy`, or
    /// `Unhealthy` if the port probe failed but the failure budget
    /// hasn't been exhausted yet.
    pub async fn check_service(&self, name: &str) -> ServiceResult<ServiceHealth> {
        let instance = self.instance(name).await?;
        if instance.status().await != ServiceStatus::Running {
            return Ok(ServiceHealth::Unavailable);
        }

        let mut port_probe_failed = false;
        let port = instance.port().await;
        if port != 0 {
            if probe_port(port).await {
                instance.reset_failed_count().await;
            } else {
                port_probe_failed = true;
                let failures = instance.bump_failed_count().await;
                if failures >= PORT_FAILURE_THRESHOLD {
                    return Ok(ServiceHealth::Unavailable);
                }
            }
        }

        if instance.process().check_process(&*self.lister).await != Health::Healthy {
            return Ok(ServiceHealth::Unavailable);
        }

        if let Some(tunnel) = instance.tunnel().await {
            if !tunnel.is_healthy(&*self.lister).await {
                return Ok(ServiceHealth::Incomplete);
            }
        }

        if port_probe_failed {
            return Ok(ServiceHealth::Unhealthy);
        }
        Ok(ServiceHealth::Healthy)
    }

    /// Reopens the tunnel on `Incomplete`; fully restarts the service on
    /// `Unavailable` (resetting its failure count first); otherwise a
    /// no-op.
    pub async fn recover_service(&self, name: &str) -> ServiceResult<()> {
        match self.check_service(name).await? {
            ServiceHealth::Incomplete => {
                let instance = self.instance(name).await?;
                if let Some(tunnel) = instance.tunnel().await {
                    let auth_header = self.auth.auth_header().await?;
                    tunnel.reopen(self.daemonized, &auth_header).await?;
                }
                Ok(())
            }
            ServiceHealth::Unavailable => {
                let instance = self.instance(name).await?;
                instance.reset_failed_count().await;
                self.stop_service(name).await?;
                self.start_service(name).await
            }
            ServiceHealth::Healthy | ServiceHealth::Unhealthy => Ok(()),
        }
    }

    /// Starts every `startup=always` service not already `Running`.
    /// `startup=once` tools are handled separately by
    /// [`Self::run_once_tools`]: they are genuinely fire-and-forget and
    /// are not part of the steady-state service set this drives. The
    /// self service (`child=false`) represents the already-running
    /// supervisor and is never spawned as a supervised child.
    pub async fn start_all(&self) -> ServiceResult<()> {
        for name in self.names_with_startup(Startup::Always).await {
            let instance = self.instance(&name).await?;
            if !instance.is_child() {
                continue;
            }
            if instance.status().await != ServiceStatus::Running {
                self.start_service(&name).await?;
            }
        }
        Ok(())
    }

    /// Spawns every `startup=once` tool and leaves it running
    /// independently; their exit is never awaited here.
    pub async fn run_once_tools(&self) -> ServiceResult<()> {
        for name in self.names_with_startup(Startup::Once).await {
            let instance = self.instance(&name).await?;
            let spec = instance.spec().clone();
            let command = template::expand(&spec.command, &spec.name, spec.port);
            let args: Vec<String> = spec
                .args
                .iter()
                .map(|a| template::expand(a, &spec.name, spec.port))
                .collect();
            instance.process().reconfigure(command, args).await;
            instance.process().start().await?;
            instance.set_status(ServiceStatus::Running).await;
        }
        Ok(())
    }

    /// Stops every currently-`Running` service.
    pub async fn stop_all(&self) -> ServiceResult<()> {
        let running: Vec<String> = {
            let mut out = Vec::new();
            for instance in self.entries.read().await.values() {
                if instance.status().await == ServiceStatus::Running {
                    out.push(instance.name().to_string());
                }
            }
            out
        };
        for name in running {
            self.stop_service(&name).await?;
        }
        Ok(())
    }

    /// A stable, name-sorted snapshot of every registered service.
    /// `include_self` controls whether the supervisor's own service is
    /// included.
    pub async fn list(&self, include_self: bool) -> Vec<ServiceDetail> {
        let entries = self.entries.read().await;
        let mut out = Vec::new();
        for instance in entries.values() {
            if !include_self && !instance.is_child() {
                continue;
            }
            out.push(instance.detail().await);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// PIDs this manager currently expects to be alive: every running
    /// service's process plus its tunnel's bridging process, if any.
    /// Used by the supervisor's excessive-process detector to tell an
    /// expected child apart from a stray one sharing the same name.
    pub async fn expected_pids(&self) -> Vec<u32> {
        let entries = self.entries.read().await;
        let mut pids = Vec::new();
        for instance in entries.values() {
            if let Some(pid) = instance.process().detail().await.pid {
                pids.push(pid);
            }
            if let Some(tunnel) = instance.tunnel().await {
                if let Some(pid) = tunnel.process().detail().await.pid {
                    pids.push(pid);
                }
            }
        }
        pids
    }

    /// Closes a service's tunnel, if it has one, without stopping the
    /// service itself. The local port stays leased; only the bridging
    /// process and the remote mapping go away. A later `check_service`
    /// or `recover_service` call reopens it on demand (`Incomplete`).
    pub async fn close_tunnel(&self, name: &str) -> ServiceResult<()> {
        let instance = self.instance(name).await?;
        if let Some(tunnel) = instance.tunnel().await {
            tunnel.close().await?;
            instance.clear_tunnel().await;
        }
        Ok(())
    }

    pub async fn detail(&self, name: &str) -> ServiceResult<ServiceDetail> {
        Ok(self.instance(name).await?.detail().await)
    }

    /// Atomically writes `<share>/.well-known.json`: every registered
    /// service's public shape plus the supervisor's log configuration.
    pub async fn export_knowledge(&self, path: &Path) -> ServiceResult<()> {
        let names: Vec<String> = {
            let mut n: Vec<String> = self.entries.read().await.keys().cloned().collect();
            n.sort();
            n
        };

        let mut services = Vec::with_capacity(names.len());
        for name in &names {
            let instance = self.instance(name).await?;
            let spec = instance.spec().clone();
            let detail = instance.detail().await;
            let (version, installed) = match self.components.detail(instance.component_name()).await {
                Ok(d) => (d.local_version.map(|v| v.to_string()), d.installed),
                Err(_) => (None, !instance.is_child()),
            };
            services.push(ServiceKnowledge {
                name: name.clone(),
                version,
                installed,
                command: spec.command,
                status: detail.status.as_str().to_string(),
                port: detail.port,
                startup: spec.startup,
                protocol: spec.protocol,
                metrics: spec.metrics,
                healthy: spec.healthy,
                accessible: spec.accessible,
            });
        }

        let file = WellKnownFile {
            logs: WellKnownLogs {
                dir: self.log_dir.clone(),
                level: self.log_level.clone(),
            },
            services,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw =
            serde_json::to_vec_pretty(&file).map_err(|e| ServiceError::Decode(e.to_string()))?;
        let tmp_path = PathBuf::from(path).with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

async fn probe_port(port: u16) -> bool {
    matches!(
        timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use costrict_component::ComponentManager;
    use costrict_config::{Accessible, ComponentSpecification};
    use costrict_repo::RepoClient;
    use costrict_store::PackageStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct AlwaysAlive;
    impl costrict_core::ProcessLister for AlwaysAlive {
        fn list_by_name(&self, _name: &str) -> Vec<costrict_core::OsProcess> {
            Vec::new()
        }
        fn name_of(&self, _pid: u32) -> Option<String> {
            Some("sleep".to_string())
        }
        fn is_alive(&self, _pid: u32) -> bool {
            true
        }
    }

    fn keeper_spec() -> ManagerSpecification {
        ManagerSpecification {
            component: ComponentSpecification {
                name: "costrict-keeper".to_string(),
                install_dir: None,
            },
            service: ServiceSpecification {
                name: "keeper".to_string(),
                startup: Startup::Always,
                port: 8999,
                command: "costrict-keeperd".to_string(),
                args: vec![],
                protocol: String::new(),
                metrics: None,
                healthy: None,
                accessible: Accessible::Local,
            },
        }
    }

    fn demo_service(accessible: Accessible) -> ServiceSpecification {
        ServiceSpecification {
            name: "demo".to_string(),
            startup: Startup::Always,
            port: 0,
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            protocol: String::new(),
            metrics: None,
            healthy: None,
            accessible,
        }
    }

    async fn build_manager(port_min: u16, port_max: u16, tunnel_url: String) -> ServiceManager {
        let tmp = tempfile::tempdir().unwrap().into_path();
        let dir = CostrictDir::from_path(&tmp);
        dir.ensure().unwrap();

        let repo = RepoClient::new("https://repo.invalid", false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));
        let components = Arc::new(ComponentManager::new(
            dir.bin_dir(),
            store,
            repo,
            false,
            true,
            vec![ComponentSpecification {
                name: "demo".to_string(),
                install_dir: None,
            }],
            vec![],
        ));

        let auth_path = dir.auth_path();
        tokio::fs::write(
            &auth_path,
            r#"{"id":"u1","name":"alice","access_token":"tok123","machine_id":"m1","base_url":"https://example.com"}"#,
        )
        .await
        .unwrap();

        ServiceManager::new(ServiceManagerConfig {
            dir,
            port_pool: Arc::new(Mutex::new(PortPool::new(port_min, port_max))),
            components,
            tunnel_manager: TunnelManagerClient::new(tunnel_url),
            auth: Arc::new(AuthStore::new(auth_path)),
            tunnel_client_template: TunnelClientTemplate {
                command: "sleep".to_string(),
                args: vec!["5".to_string()],
            },
            remote_addr: "tun.example.com:443".to_string(),
            lister: Arc::new(AlwaysAlive),
            daemonized: false,
            log_dir: "/var/log/costrict".to_string(),
            log_level: "info".to_string(),
        })
    }

    #[tokio::test]
    async fn init_registers_self_and_declared_services() {
        let manager = build_manager(21000, 21000, "https://tun.invalid".to_string()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Local)])
            .await
            .unwrap();

        let list = manager.list(true).await;
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["demo", "keeper"]);

        let children_only = manager.list(false).await;
        assert_eq!(children_only.len(), 1);
        assert_eq!(children_only[0].name, "demo");
    }

    #[tokio::test]
    async fn init_rejects_always_service_with_unknown_component() {
        let manager = build_manager(21100, 21100, "https://tun.invalid".to_string()).await;
        let mut ghost = demo_service(Accessible::Local);
        ghost.name = "ghost".to_string();

        let err = manager.init(&keeper_spec(), vec![ghost]).await.unwrap_err();
        assert!(matches!(err, ServiceError::ComponentNotFound(_)));
    }

    #[tokio::test]
    async fn start_then_stop_local_service_frees_its_port() {
        let manager = build_manager(21200, 21200, "https://tun.invalid".to_string()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Local)])
            .await
            .unwrap();

        manager.start_service("demo").await.unwrap();
        let detail = manager.detail("demo").await.unwrap();
        assert_eq!(detail.status, ServiceStatus::Running);
        assert_eq!(detail.port, 21200);

        manager.stop_service("demo").await.unwrap();
        let detail = manager.detail("demo").await.unwrap();
        assert_eq!(detail.status, ServiceStatus::Stopped);

        // The only port in range was freed; a direct alloc proves it.
        let reallocated = manager.port_pool.lock().await.alloc(0).await.unwrap();
        assert_eq!(reallocated, 21200);
    }

    #[tokio::test]
    async fn start_remote_service_opens_a_tunnel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ports"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "mappingPort": 7000 })),
            )
            .mount(&server)
            .await;

        let manager = build_manager(21300, 21300, server.uri()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Remote)])
            .await
            .unwrap();

        manager.start_service("demo").await.unwrap();
        let detail = manager.detail("demo").await.unwrap();
        assert_eq!(detail.tunnel_pairs.len(), 1);
        assert_eq!(detail.tunnel_pairs[0].mapping_port, 7000);

        manager.stop_service("demo").await.unwrap();
        let detail = manager.detail("demo").await.unwrap();
        assert!(detail.tunnel_pairs.is_empty());
    }

    #[tokio::test]
    async fn check_service_unavailable_before_start() {
        let manager = build_manager(21400, 21400, "https://tun.invalid".to_string()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Local)])
            .await
            .unwrap();

        let health = manager.check_service("demo").await.unwrap();
        assert_eq!(health, ServiceHealth::Unavailable);
    }

    #[tokio::test]
    async fn recover_service_starts_a_not_started_service() {
        let manager = build_manager(21500, 21500, "https://tun.invalid".to_string()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Local)])
            .await
            .unwrap();

        manager.recover_service("demo").await.unwrap();
        let detail = manager.detail("demo").await.unwrap();
        assert_eq!(detail.status, ServiceStatus::Running);
        manager.stop_service("demo").await.unwrap();
    }

    #[tokio::test]
    async fn export_knowledge_writes_well_known_file() {
        let manager = build_manager(21600, 21600, "https://tun.invalid".to_string()).await;
        manager
            .init(&keeper_spec(), vec![demo_service(Accessible::Local)])
            .await
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("well-known.json");
        manager.export_knowledge(&path).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let file: WellKnownFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(file.services.len(), 2);
        assert_eq!(file.logs.level, "info");
    }
}
