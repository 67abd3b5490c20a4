//! MD5 checksum and RSA signature verification for package payloads.
//!
//! For a package payload to be accepted: `MD5(payload) == checksum` AND
//! `RSA-verify(publicKey, sign, checksum-as-ASCII) == ok`. The signing
//! scheme is PKCS#1 v1.5 over SHA-256 of the checksum's ASCII bytes
//! (see DESIGN.md for why this digest/padding combination was chosen).

use md5::{Digest as _, Md5};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest as _, Sha256};

use crate::error::{CryptoError, CryptoResult};

/// Computes the MD5 hex digest of `payload`.
#[must_use]
pub fn md5_hex(payload: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Verifies `payload`'s MD5 digest equals `checksum` (case-insensitively).
pub fn verify_checksum(payload: &[u8], checksum: &str) -> CryptoResult<()> {
    if md5_hex(payload).eq_ignore_ascii_case(checksum) {
        Ok(())
    } else {
        Err(CryptoError::ChecksumMismatch)
    }
}

/// Parses a PEM-or-DER RSA public key, trying PKCS#1 then SPKI.
fn parse_public_key(public_key_pem: &str) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(public_key_pem))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies `signature_hex` (hex-encoded RSA signature) against the
/// SHA-256 digest of `checksum`'s ASCII bytes.
pub fn verify_signature(
    public_key_pem: &str,
    checksum: &str,
    signature_hex: &str,
) -> CryptoResult<()> {
    let public_key = parse_public_key(public_key_pem)?;
    let signature = hex::decode(signature_hex)
        .map_err(|e| CryptoError::InvalidSignatureEncoding(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(checksum.as_bytes());
    let digest = hasher.finalize();

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Runs both checks `Get`'s staging protocol requires, in order.
pub fn verify_payload(
    payload: &[u8],
    checksum: &str,
    signature_hex: &str,
    public_key_pem: &str,
) -> CryptoResult<()> {
    verify_checksum(payload, checksum)?;
    verify_signature(public_key_pem, checksum, signature_hex)
}
