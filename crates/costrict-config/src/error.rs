//! Errors raised by config, system-spec, and auth loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {cause}")]
    Io { path: String, cause: String },

    #[error("malformed JSON at {path}: {cause}")]
    Decode { path: String, cause: String },

    #[error("system specification has not been loaded yet")]
    SpecNotLoaded,

    #[error("package store error loading system spec: {0}")]
    Store(#[from] costrict_store::StoreError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
