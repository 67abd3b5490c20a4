//! Checksum and signature verification for downloaded package payloads.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod verify;

pub use error::{CryptoError, CryptoResult};
pub use verify::{md5_hex, verify_checksum, verify_payload, verify_signature};
