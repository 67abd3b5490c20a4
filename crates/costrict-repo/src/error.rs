//! Errors raised by the package repository client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("network error fetching {url}: {cause}")]
    NetworkError { url: String, cause: String },

    #[error("could not decode response from {url}: {cause}")]
    DecodeError { url: String, cause: String },
}

pub type RepoResult<T> = Result<T, RepoError>;
