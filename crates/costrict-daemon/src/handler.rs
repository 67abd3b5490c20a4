//! RPC implementation for the keeper daemon.
//!
//! `RpcImpl` holds the shared managers and implements [`CostrictRpcServer`]
//! by delegating straight to them, translating their typed errors into
//! JSON-RPC error objects at the boundary.

use std::sync::Arc;

use costrict_component::{ComponentError, ComponentManager};
use costrict_service::{ServiceError, ServiceManager};
use costrict_supervisor::{HealthSummary, Supervisor};
use jsonrpsee::types::ErrorObjectOwned;

use crate::rpc::{error_codes, ComponentInfo, CostrictRpcServer, ServiceInfo, TunnelPairWire};

/// Holds every manager the RPC surface delegates to.
pub struct RpcImpl {
    pub supervisor: Arc<Supervisor>,
    pub services: Arc<ServiceManager>,
    pub components: Arc<ComponentManager>,
}

fn service_error(e: ServiceError) -> ErrorObjectOwned {
    match e {
        ServiceError::ServiceNotFound(name) => ErrorObjectOwned::owned(
            error_codes::SERVICE_NOT_FOUND,
            format!("service not found: {name}"),
            None::<()>,
        ),
        other => ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, other.to_string(), None::<()>),
    }
}

fn component_error(e: ComponentError) -> ErrorObjectOwned {
    match e {
        ComponentError::ComponentNotFound(name) => ErrorObjectOwned::owned(
            error_codes::COMPONENT_NOT_FOUND,
            format!("component not found: {name}"),
            None::<()>,
        ),
        ComponentError::NotInstalled(name) => ErrorObjectOwned::owned(
            error_codes::COMPONENT_NOT_INSTALLED,
            format!("component not installed: {name}"),
            None::<()>,
        ),
        other => ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, other.to_string(), None::<()>),
    }
}

fn to_service_info(detail: costrict_service::ServiceDetail) -> ServiceInfo {
    ServiceInfo {
        name: detail.name,
        status: detail.status.as_str().to_string(),
        port: detail.port,
        pid: detail.pid,
        failed_count: detail.failed_count,
        tunnel_pairs: detail
            .tunnel_pairs
            .into_iter()
            .map(|p| TunnelPairWire {
                local_port: p.local_port,
                mapping_port: p.mapping_port,
            })
            .collect(),
    }
}

fn to_component_info(detail: costrict_component::ComponentDetail) -> ComponentInfo {
    ComponentInfo {
        name: detail.name,
        installed: detail.installed,
        local_version: detail.local_version.map(|v| v.to_string()),
        remote_newest: detail.remote_newest.map(|v| v.to_string()),
        need_upgrade: detail.need_upgrade,
    }
}

#[jsonrpsee::core::async_trait]
impl CostrictRpcServer for RpcImpl {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, ErrorObjectOwned> {
        Ok(self.services.list(true).await.into_iter().map(to_service_info).collect())
    }

    async fn service_detail(&self, name: String) -> Result<ServiceInfo, ErrorObjectOwned> {
        self.services
            .detail(&name)
            .await
            .map(to_service_info)
            .map_err(service_error)
    }

    async fn start_service(&self, name: String) -> Result<(), ErrorObjectOwned> {
        self.services.start_service(&name).await.map_err(service_error)
    }

    async fn stop_service(&self, name: String) -> Result<(), ErrorObjectOwned> {
        self.services.stop_service(&name).await.map_err(service_error)
    }

    async fn restart_service(&self, name: String) -> Result<(), ErrorObjectOwned> {
        self.services.stop_service(&name).await.map_err(service_error)?;
        self.services.start_service(&name).await.map_err(service_error)
    }

    async fn list_components(&self) -> Result<Vec<ComponentInfo>, ErrorObjectOwned> {
        Ok(self.components.list().await.into_iter().map(to_component_info).collect())
    }

    async fn upgrade_component(&self, name: String) -> Result<bool, ErrorObjectOwned> {
        self.components.upgrade(&name).await.map_err(component_error)
    }

    async fn remove_component(&self, name: String) -> Result<(), ErrorObjectOwned> {
        self.components.remove(&name).await.map_err(component_error)
    }

    async fn list_tunnels(&self) -> Result<Vec<ServiceInfo>, ErrorObjectOwned> {
        Ok(self
            .services
            .list(true)
            .await
            .into_iter()
            .filter(|d| !d.tunnel_pairs.is_empty())
            .map(to_service_info)
            .collect())
    }

    async fn close_tunnel(&self, name: String) -> Result<(), ErrorObjectOwned> {
        self.services.close_tunnel(&name).await.map_err(service_error)
    }

    async fn healthz(&self) -> Result<(), ErrorObjectOwned> {
        Ok(())
    }

    async fn check(&self) -> Result<HealthSummary, ErrorObjectOwned> {
        Ok(self.supervisor.check().await)
    }
}
