//! Errors raised by process instances.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start process {title}: {cause}")]
    StartFailed { title: String, cause: String },

    #[error("no such process {pid} or name mismatch: expected {expected}, found {found:?}")]
    AttachNameMismatch {
        pid: u32,
        expected: String,
        found: Option<String>,
    },
}

pub type ProcessResult<T> = Result<T, ProcessError>;
