//! Errors raised by the service manager.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("component {0} required by a service is not declared")]
    ComponentNotFound(String),

    #[error("core error: {0}")]
    Core(#[from] costrict_core::CoreError),

    #[error("process error: {0}")]
    Process(#[from] costrict_process::ProcessError),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] costrict_tunnel::TunnelError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] costrict_config::ConfigError),

    #[error("malformed knowledge/cache payload: {0}")]
    Decode(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
