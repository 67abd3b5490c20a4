//! Errors raised by checksum and signature verification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("computed MD5 checksum does not match declared checksum")]
    ChecksumMismatch,

    #[error("RSA signature verification failed")]
    SignatureInvalid,

    #[error("malformed public key: {0}")]
    InvalidPublicKey(String),

    #[error("malformed signature encoding: {0}")]
    InvalidSignatureEncoding(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
