//! Errors raised by the component manager.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("component {0} is not installed")]
    NotInstalled(String),

    #[error("store error: {0}")]
    Store(#[from] costrict_store::StoreError),

    #[error("repository error: {0}")]
    Repo(#[from] costrict_repo::RepoError),
}

pub type ComponentResult<T> = Result<T, ComponentError>;
