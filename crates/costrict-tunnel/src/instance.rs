//! A tunnel: a remote-assigned mapping port plus a supervised child
//! process bridging a local port to it.
//!
//! The local port itself is a lease the owning Service Instance holds
//! against the Port Pool; the tunnel only
//! allocates the *remote* mapping port and runs the bridging child.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use costrict_core::ProcessLister;
use costrict_process::{Health, ProcessConfig, ProcessInstance};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::TunnelResult;
use crate::manager_client::{DriftCheck, TunnelManagerClient};
use crate::template::TemplateValues;
use crate::types::{TunnelCache, TunnelConfig, TunnelPair, TunnelStatus};

/// Restart budget for the bridging child when daemonized.
const TUNNEL_MAX_RESTART: u32 = 7;

struct Inner {
    config: TunnelConfig,
    cache_path: PathBuf,
    manager: TunnelManagerClient,
    status: TunnelStatus,
    mapping_port: Option<u16>,
    created_time: Option<SystemTime>,
}

/// A tunnel instance. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct TunnelInstance {
    inner: Arc<Mutex<Inner>>,
    process: ProcessInstance,
}

impl TunnelInstance {
    #[must_use]
    pub fn new(config: TunnelConfig, cache_path: PathBuf, manager: TunnelManagerClient) -> Self {
        let process = ProcessInstance::new(ProcessConfig {
            title: format!("tunnel:{}", config.name),
            process_name: config.process_name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            work_dir: None,
        });
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                cache_path,
                manager,
                status: TunnelStatus::Stopped,
                mapping_port: None,
                created_time: None,
            })),
            process,
        }
    }

    #[must_use]
    pub fn process(&self) -> &ProcessInstance {
        &self.process
    }

    /// Opens the tunnel: fail-closed by default, requests a mapping port,
    /// spawns the bridging child, and persists the cache on every exit
    /// path.
    pub async fn open(&self, daemonized: bool, auth_header: &str) -> TunnelResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.status = TunnelStatus::Error;
        }
        self.save_cache().await?;

        let (name, client_id, app_name, local_port, manager) = {
            let inner = self.inner.lock().await;
            (
                inner.config.name.clone(),
                inner.config.client_id.clone(),
                inner.config.app_name.clone(),
                inner.config.local_port,
                inner.manager.clone(),
            )
        };

        let mapping_port = manager
            .allocate(&name, auth_header, &client_id, &app_name, local_port)
            .await?;

        let (command, args) = {
            let inner = self.inner.lock().await;
            let values = TemplateValues::from_config(&inner.config, mapping_port);
            let command = values.expand(&inner.config.command);
            let args = inner.config.args.iter().map(|a| values.expand(a)).collect();
            (command, args)
        };

        if daemonized {
            let handle = self.clone();
            self.process
                .set_watcher(TUNNEL_MAX_RESTART, move |detail| {
                    let handle = handle.clone();
                    let status = match detail.status {
                        costrict_process::ProcessStatus::Running => TunnelStatus::Running,
                        _ => TunnelStatus::Error,
                    };
                    tokio::spawn(async move {
                        handle.set_status_and_save(status).await;
                    });
                })
                .await;
        }

        // The command/args were fixed at construction time with
        // unexpanded placeholders; re-point the underlying process at
        // the expanded command for this open.
        self.process.reconfigure(command, args).await;
        self.process.start().await?;
        let start_time = self.process.detail().await.start_time;

        {
            let mut inner = self.inner.lock().await;
            inner.status = TunnelStatus::Running;
            inner.mapping_port = Some(mapping_port);
            inner.created_time = start_time;
        }
        self.save_cache().await?;

        info!(name, mapping_port, "tunnel opened");
        Ok(())
    }

    async fn set_status_and_save(&self, status: TunnelStatus) {
        {
            let mut inner = self.inner.lock().await;
            inner.status = status;
        }
        if let Err(e) = self.save_cache().await {
            warn!(error = %e, "failed to save tunnel cache after process transition");
        }
    }

    /// Stops the child, frees nothing itself (the local port belongs to
    /// the owning Service), deletes the cache file, and sets `Stopped`.
    pub async fn close(&self) -> TunnelResult<()> {
        self.process.stop().await?;
        {
            let mut inner = self.inner.lock().await;
            inner.status = TunnelStatus::Stopped;
            inner.mapping_port = None;
        }
        let path = self.inner.lock().await.cache_path.clone();
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Close (if running) then Open.
    pub async fn reopen(&self, daemonized: bool, auth_header: &str) -> TunnelResult<()> {
        let running = self.inner.lock().await.status == TunnelStatus::Running;
        if running {
            self.close().await?;
        }
        self.open(daemonized, auth_header).await
    }

    /// Checks the remote mapping against the tunnel manager; reopens on
    /// drift (mapping changed or no longer allocated).
    pub async fn check_drift(&self, daemonized: bool, auth_header: &str) -> TunnelResult<()> {
        let (name, client_id, app_name, mapping_port, manager) = {
            let inner = self.inner.lock().await;
            let Some(mapping_port) = inner.mapping_port else {
                return Ok(());
            };
            (
                inner.config.name.clone(),
                inner.config.client_id.clone(),
                inner.config.app_name.clone(),
                mapping_port,
                inner.manager.clone(),
            )
        };

        let result = manager
            .check_drift(&name, auth_header, &client_id, &app_name, mapping_port)
            .await?;
        if result == DriftCheck::NeedsRestart {
            self.reopen(daemonized, auth_header).await?;
        }
        Ok(())
    }

    /// `Running` AND the bridging process is OS-alive.
    pub async fn is_healthy(&self, lister: &dyn ProcessLister) -> bool {
        let status = self.inner.lock().await.status;
        status == TunnelStatus::Running
            && self.process.check_process(lister).await == Health::Healthy
    }

    #[must_use]
    pub async fn status(&self) -> TunnelStatus {
        self.inner.lock().await.status
    }

    #[must_use]
    pub async fn pairs(&self) -> Vec<TunnelPair> {
        let inner = self.inner.lock().await;
        match inner.mapping_port {
            Some(mapping_port) => vec![TunnelPair {
                local_port: inner.config.local_port,
                mapping_port,
            }],
            None => Vec::new(),
        }
    }

    async fn save_cache(&self) -> TunnelResult<()> {
        let (cache, path) = {
            let inner = self.inner.lock().await;
            let pairs = match inner.mapping_port {
                Some(mapping_port) => vec![TunnelPair {
                    local_port: inner.config.local_port,
                    mapping_port,
                }],
                None => Vec::new(),
            };
            let pid = self.process.detail().await.pid.unwrap_or(0);
            (
                TunnelCache {
                    name: inner.config.name.clone(),
                    pairs,
                    status: inner.status,
                    created_time: inner.created_time,
                    pid,
                },
                inner.cache_path.clone(),
            )
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(&cache)
            .expect("TunnelCache serialization cannot fail: no non-finite floats, no maps with non-string keys");
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// On supervisor start: reload the persisted cache and, if it names a
    /// live PID, re-attach to it instead of spawning a fresh child.
    pub async fn reload_and_attach(
        &self,
        lister: Arc<dyn ProcessLister>,
        daemonized: bool,
    ) -> TunnelResult<bool> {
        let path = self.inner.lock().await.cache_path.clone();
        let Ok(raw) = tokio::fs::read_to_string(&path).await else {
            return Ok(false);
        };
        let Ok(cache) = serde_json::from_str::<TunnelCache>(&raw) else {
            return Ok(false);
        };
        if cache.pid == 0 {
            return Ok(false);
        }

        if daemonized {
            let handle = self.clone();
            self.process
                .set_watcher(TUNNEL_MAX_RESTART, move |detail| {
                    let handle = handle.clone();
                    let status = match detail.status {
                        costrict_process::ProcessStatus::Running => TunnelStatus::Running,
                        _ => TunnelStatus::Error,
                    };
                    tokio::spawn(async move {
                        handle.set_status_and_save(status).await;
                    });
                })
                .await;
        }

        match self.process.attach(cache.pid, lister).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                inner.status = cache.status;
                inner.mapping_port = cache.pairs.first().map(|p| p.mapping_port);
                inner.created_time = cache.created_time;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
