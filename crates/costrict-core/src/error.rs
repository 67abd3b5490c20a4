//! Error types shared by the core crate.

use thiserror::Error;

/// Errors raised by version parsing, the port pool, and directory
/// resolution.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A version string was not exactly three dot-separated non-negative
    /// decimal integers.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// The port pool's configured range is exhausted.
    #[error("no port available in configured range")]
    NoPortAvailable,

    /// `$COSTRICT_HOME` was set but is not an absolute path.
    #[error("COSTRICT_HOME must be an absolute path, got {0}")]
    HomeNotAbsolute(String),

    /// Could not determine the user's home directory.
    #[error("could not determine home directory")]
    NoHomeDirectory,

    /// I/O failure while preparing the directory layout.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
