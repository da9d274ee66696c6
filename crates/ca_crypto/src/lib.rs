//! ca_crypto — Commands Agent Desktop cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Fail closed: no fallback algorithms are ever negotiated.
//!
//! # Module layout
//! - `identity`   — long-term Ed25519 agent identity keys + fingerprints
//! - `ecdh`       — X25519 ephemeral key pairs and key agreement
//! - `kdf`        — HKDF-SHA256 expansion and session-key derivation
//! - `aead`       — AES-256-GCM seal/open with detached 16-byte tag
//! - `spki`       — fixed-prefix SPKI (de)serialisation for X25519/Ed25519
//! - `transcript` — handshake transcript hash (signature message + HKDF salt)
//! - `keys`       — the three directional/control session keys
//! - `error`      — unified error type

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod spki;
pub mod transcript;

pub use error::CryptoError;
pub use keys::SessionKeys;

/// Constant-time byte-slice equality.
///
/// Length mismatch returns false immediately — lengths are public here
/// (nonces and AADs have fixed, known sizes).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
