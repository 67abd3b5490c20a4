//! Errors raised by the supervisor loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("component error: {0}")]
    Component(#[from] costrict_component::ComponentError),

    #[error("service error: {0}")]
    Service(#[from] costrict_service::ServiceError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
