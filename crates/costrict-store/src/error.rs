//! Errors raised by the package store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version {0} not found among remote versions")]
    VersionNotFound(String),

    #[error("checksum mismatch staging {0}")]
    ChecksumMismatch(String),

    #[error("signature invalid staging {0}")]
    SignatureInvalid(String),

    #[error("network error: {0}")]
    Network(#[from] costrict_repo::RepoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata at {path}: {cause}")]
    Decode { path: String, cause: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `GetLocalVersion` distinguishes "not installed" from a hard error;
/// this is a normal signal, not an error (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotInstalled;
