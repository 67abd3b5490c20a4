//! JSON-RPC API definition for the keeper's HTTP control surface.
//!
//! Uses jsonrpsee proc macros to define the RPC interface; the daemon
//! implements the server side in [`crate::handler`].

use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

pub use costrict_supervisor::{HealthState, HealthSummary};

/// One local-port-to-remote-mapping-port pair (wire type).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TunnelPairWire {
    pub local_port: u16,
    pub mapping_port: u16,
}

/// A point-in-time view of one declared service (wire type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// `"not_started"`, `"running"`, `"stopped"`, or `"error"`.
    pub status: String,
    /// The port the service is bound to, `0` if not yet started.
    pub port: u16,
    /// OS PID of the running process, if any.
    pub pid: Option<u32>,
    /// How many consecutive port probes have failed since the last success.
    pub failed_count: u32,
    /// Remote tunnel pairs, empty unless `accessible = remote` and a
    /// tunnel is currently open.
    pub tunnel_pairs: Vec<TunnelPairWire>,
}

/// A point-in-time view of one declared component (wire type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component name.
    pub name: String,
    /// Whether a version is currently installed.
    pub installed: bool,
    /// The installed version, if any.
    pub local_version: Option<String>,
    /// The newest version the repository currently offers.
    pub remote_newest: Option<String>,
    /// Whether `local_version` is behind `remote_newest`.
    pub need_upgrade: bool,
}

/// Application-defined JSON-RPC error codes, in the reserved
/// implementation-defined range.
pub mod error_codes {
    /// `serviceDetail`/`startService`/`stopService`/`restartService`/`closeTunnel`
    /// named an undeclared service.
    pub const SERVICE_NOT_FOUND: i32 = -32001;
    /// `upgradeComponent`/`removeComponent` named an undeclared component.
    pub const COMPONENT_NOT_FOUND: i32 = -32002;
    /// `removeComponent` on a component that isn't installed.
    pub const COMPONENT_NOT_INSTALLED: i32 = -32003;
    /// Any other failure surfaced from the underlying manager.
    pub const INTERNAL_ERROR: i32 = -32004;
}

/// The keeper's control-plane JSON-RPC interface.
#[rpc(server, client, namespace = "costrict")]
pub trait CostrictRpc {
    /// Every registered service, name-sorted.
    #[method(name = "listServices")]
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, ErrorObjectOwned>;

    /// One service's current detail.
    #[method(name = "serviceDetail")]
    async fn service_detail(&self, name: String) -> Result<ServiceInfo, ErrorObjectOwned>;

    /// Starts a declared service (allocates a port, spawns or re-attaches
    /// its process, opens a tunnel if `accessible = remote`).
    #[method(name = "startService")]
    async fn start_service(&self, name: String) -> Result<(), ErrorObjectOwned>;

    /// Stops a service, closing its tunnel and freeing its port.
    #[method(name = "stopService")]
    async fn stop_service(&self, name: String) -> Result<(), ErrorObjectOwned>;

    /// Stops then starts a service.
    #[method(name = "restartService")]
    async fn restart_service(&self, name: String) -> Result<(), ErrorObjectOwned>;

    /// Every declared component, name-sorted.
    #[method(name = "listComponents")]
    async fn list_components(&self) -> Result<Vec<ComponentInfo>, ErrorObjectOwned>;

    /// Upgrades a component to the newest version if out of date.
    /// Returns whether an upgrade actually ran.
    #[method(name = "upgradeComponent")]
    async fn upgrade_component(&self, name: String) -> Result<bool, ErrorObjectOwned>;

    /// Removes an installed component. Fails if not installed.
    #[method(name = "removeComponent")]
    async fn remove_component(&self, name: String) -> Result<(), ErrorObjectOwned>;

    /// Every service currently holding an open tunnel.
    #[method(name = "listTunnels")]
    async fn list_tunnels(&self) -> Result<Vec<ServiceInfo>, ErrorObjectOwned>;

    /// Closes a service's tunnel without stopping the service; a later
    /// recovery pass reopens it on demand.
    #[method(name = "closeTunnel")]
    async fn close_tunnel(&self, name: String) -> Result<(), ErrorObjectOwned>;

    /// A lightweight liveness probe: this daemon is responding at all.
    #[method(name = "healthz")]
    async fn healthz(&self) -> Result<(), ErrorObjectOwned>;

    /// The full aggregate health rollup across every service and
    /// component.
    #[method(name = "check")]
    async fn check(&self) -> Result<HealthSummary, ErrorObjectOwned>;
}
