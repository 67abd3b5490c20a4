//! One declared service: a Process Instance plus an optional Tunnel
//! Instance, with its own status/port/failure-count state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use costrict_config::ServiceSpecification;
use costrict_process::{ProcessConfig, ProcessInstance};
use costrict_tunnel::TunnelInstance;
use tokio::sync::Mutex;

use crate::error::{ServiceError, ServiceResult};
use crate::types::{ServiceCache, ServiceDetail, ServiceStatus};

struct Inner {
    status: ServiceStatus,
    port: u16,
    start_time: Option<SystemTime>,
    failed_count: u32,
    tunnel: Option<TunnelInstance>,
}

fn basename(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| command.to_string())
}

/// A declared service. `child = true` means it is a sibling process
/// supervised here; `child = false` is the supervisor itself (the
/// "self" service built from `Manager.service`).
#[derive(Clone)]
pub struct ServiceInstance {
    name: String,
    spec: ServiceSpecification,
    component_name: String,
    child: bool,
    process: ProcessInstance,
    cache_path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl ServiceInstance {
    #[must_use]
    pub fn new(
        spec: ServiceSpecification,
        component_name: String,
        child: bool,
        cache_path: PathBuf,
    ) -> Self {
        let name = spec.name.clone();
        let process = ProcessInstance::new(ProcessConfig {
            title: name.clone(),
            process_name: basename(&spec.command),
            command: spec.command.clone(),
            args: spec.args.clone(),
            work_dir: None,
        });
        Self {
            name,
            spec,
            component_name,
            child,
            process,
            cache_path,
            inner: Arc::new(Mutex::new(Inner {
                status: ServiceStatus::NotStarted,
                port: 0,
                start_time: None,
                failed_count: 0,
                tunnel: None,
            })),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn spec(&self) -> &ServiceSpecification {
        &self.spec
    }

    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    #[must_use]
    pub fn is_child(&self) -> bool {
        self.child
    }

    #[must_use]
    pub fn process(&self) -> &ProcessInstance {
        &self.process
    }

    pub async fn status(&self) -> ServiceStatus {
        self.inner.lock().await.status
    }

    pub async fn set_status(&self, status: ServiceStatus) {
        self.inner.lock().await.status = status;
    }

    pub async fn set_started(&self, port: u16) {
        let mut inner = self.inner.lock().await;
        inner.status = ServiceStatus::Running;
        inner.port = port;
        inner.start_time = Some(SystemTime::now());
    }

    pub async fn port(&self) -> u16 {
        self.inner.lock().await.port
    }

    pub async fn tunnel(&self) -> Option<TunnelInstance> {
        self.inner.lock().await.tunnel.clone()
    }

    pub async fn set_tunnel(&self, tunnel: TunnelInstance) {
        self.inner.lock().await.tunnel = Some(tunnel);
    }

    pub async fn clear_tunnel(&self) {
        self.inner.lock().await.tunnel = None;
    }

    pub async fn failed_count(&self) -> u32 {
        self.inner.lock().await.failed_count
    }

    pub async fn reset_failed_count(&self) {
        self.inner.lock().await.failed_count = 0;
    }

    pub async fn bump_failed_count(&self) -> u32 {
        let mut inner = self.inner.lock().await;
        inner.failed_count += 1;
        inner.failed_count
    }

    pub async fn detail(&self) -> ServiceDetail {
        let process_detail = self.process.detail().await;
        let (status, port, start_time, failed_count, tunnel) = {
            let inner = self.inner.lock().await;
            (
                inner.status,
                inner.port,
                inner.start_time,
                inner.failed_count,
                inner.tunnel.clone(),
            )
        };
        let tunnel_pairs = match tunnel {
            Some(t) => t.pairs().await,
            None => Vec::new(),
        };
        ServiceDetail {
            name: self.name.clone(),
            status,
            port,
            start_time,
            failed_count,
            pid: process_detail.pid,
            tunnel_pairs,
        }
    }

    /// `<cache>/services/<name>.json` = `{name, status, port, pid}`.
    pub async fn save_cache(&self) -> ServiceResult<()> {
        let pid = self.process.detail().await.pid.unwrap_or(0);
        let (status, port) = {
            let inner = self.inner.lock().await;
            (inner.status, inner.port)
        };
        let cache = ServiceCache {
            name: self.name.clone(),
            status: status.as_str().to_string(),
            port,
            pid,
        };
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(&cache)
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        let tmp_path = self.cache_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, &self.cache_path).await?;
        Ok(())
    }

    /// Reads the persisted cache, returning the PID to re-attach to, if
    /// the cache exists and names one.
    pub async fn load_cached_pid(&self) -> Option<u32> {
        let raw = tokio::fs::read_to_string(&self.cache_path).await.ok()?;
        let cache: ServiceCache = serde_json::from_str(&raw).ok()?;
        (cache.pid != 0).then_some(cache.pid)
    }
}
