//! Fixed-prefix SPKI (de)serialisation.
//!
//! The gateway exchanges public keys as base64-encoded SubjectPublicKeyInfo
//! blobs. For the two curves in use the DER header is a constant 12-byte
//! prefix followed by the raw 32-byte key, so (de)serialisation is explicit
//! byte surgery — any deviation in prefix or total length is rejected.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

/// DER header for an X25519 SubjectPublicKeyInfo (RFC 8410, OID 1.3.101.110).
pub const X25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// DER header for an Ed25519 SubjectPublicKeyInfo (RFC 8410, OID 1.3.101.112).
pub const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

pub const SPKI_LEN: usize = 44;

fn encode(prefix: &[u8; 12], raw: &[u8; 32]) -> String {
    let mut out = [0u8; SPKI_LEN];
    out[..12].copy_from_slice(prefix);
    out[12..].copy_from_slice(raw);
    STANDARD.encode(out)
}

fn decode(prefix: &[u8; 12], b64: &str, what: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| CryptoError::Format(format!("{what} SPKI is not valid base64: {e}")))?;
    if bytes.len() != SPKI_LEN {
        return Err(CryptoError::Format(format!(
            "{what} SPKI must be {SPKI_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[..12] != prefix[..] {
        return Err(CryptoError::Format(format!("{what} SPKI prefix mismatch")));
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&bytes[12..]);
    Ok(raw)
}

/// Encode a raw X25519 public key as a base64 SPKI blob.
pub fn encode_x25519(raw: &[u8; 32]) -> String {
    encode(&X25519_SPKI_PREFIX, raw)
}

/// Decode a base64 X25519 SPKI blob into the raw 32-byte key.
pub fn decode_x25519(b64: &str) -> Result<[u8; 32], CryptoError> {
    decode(&X25519_SPKI_PREFIX, b64, "X25519")
}

/// Encode a raw Ed25519 public key as a base64 SPKI blob.
pub fn encode_ed25519(raw: &[u8; 32]) -> String {
    encode(&ED25519_SPKI_PREFIX, raw)
}

/// Decode a base64 Ed25519 SPKI blob into the raw 32-byte key.
pub fn decode_ed25519(b64: &str) -> Result<[u8; 32], CryptoError> {
    decode(&ED25519_SPKI_PREFIX, b64, "Ed25519")
}
