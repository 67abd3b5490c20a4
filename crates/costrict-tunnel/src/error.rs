//! Errors raised by tunnel instances and the tunnel manager client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel manager allocation failed for {name}: {cause}")]
    AllocationFailed { name: String, cause: String },

    #[error("tunnel manager returned malformed response for {name}: {cause}")]
    Decode { name: String, cause: String },

    #[error("process error: {0}")]
    Process(#[from] costrict_process::ProcessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TunnelResult<T> = Result<T, TunnelError>;
