//! Service status, health, knowledge, and cache snapshot types.

use std::time::SystemTime;

use costrict_config::{Accessible, Startup};
use serde::{Deserialize, Serialize};

/// Lifecycle status the service owner controls directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    NotStarted,
    Running,
    Stopped,
    Error,
}

/// `CheckService` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    Incomplete,
    Unavailable,
}

/// A point-in-time snapshot of one service, for HTTP detail responses.
#[derive(Debug, Clone)]
pub struct ServiceDetail {
    pub name: String,
    pub status: ServiceStatus,
    pub port: u16,
    pub start_time: Option<SystemTime>,
    pub failed_count: u32,
    pub pid: Option<u32>,
    pub tunnel_pairs: Vec<costrict_tunnel::TunnelPair>,
}

/// One entry of the well-known export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceKnowledge {
    pub name: String,
    pub version: Option<String>,
    pub installed: bool,
    pub command: String,
    pub status: String,
    pub port: u16,
    pub startup: Startup,
    pub protocol: String,
    pub metrics: Option<String>,
    pub healthy: Option<String>,
    pub accessible: Accessible,
}

/// `<share>/.well-known.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownFile {
    pub logs: WellKnownLogs,
    pub services: Vec<ServiceKnowledge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownLogs {
    pub dir: String,
    pub level: String,
}

/// `<cache>/services/<name>.json`, persisted on every significant
/// transition so a supervisor restart can re-attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCache {
    pub name: String,
    pub status: String,
    pub port: u16,
    pub pid: u32,
}

impl ServiceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}
