//! HKDF-SHA256 key derivation.
//!
//! Session keys: `HKDF-SHA256(ikm = ecdh_shared, salt = transcript_hash,
//! info = "commands.com/gateway/v1/e2ee", L = 96)`, split 32/32/32 into
//! client→agent, agent→client, and control keys.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{error::CryptoError, keys::SessionKeys};

/// Domain-separation string for session key derivation. Must match the
/// agent runtime byte for byte.
pub const SESSION_KEY_INFO: &[u8] = b"commands.com/gateway/v1/e2ee";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_sha256_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the three session keys from the ECDH shared secret, salted by the
/// transcript hash (its base64 string bytes, exactly as signed).
pub fn derive_session_keys(
    ecdh_shared: &[u8; 32],
    transcript_hash_b64: &str,
) -> Result<SessionKeys, CryptoError> {
    let mut okm = [0u8; 96];
    hkdf_sha256_expand(
        ecdh_shared,
        Some(transcript_hash_b64.as_bytes()),
        SESSION_KEY_INFO,
        &mut okm,
    )?;

    let mut k_c2a = [0u8; 32];
    let mut k_a2c = [0u8; 32];
    let mut k_control = [0u8; 32];
    k_c2a.copy_from_slice(&okm[0..32]);
    k_a2c.copy_from_slice(&okm[32..64]);
    k_control.copy_from_slice(&okm[64..96]);
    okm.zeroize();

    Ok(SessionKeys { k_c2a, k_a2c, k_control })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let shared = [0x11u8; 32];
        let a = derive_session_keys(&shared, "salt-a").unwrap();
        let b = derive_session_keys(&shared, "salt-a").unwrap();
        assert_eq!(a.k_c2a, b.k_c2a);
        assert_eq!(a.k_a2c, b.k_a2c);
        assert_eq!(a.k_control, b.k_control);
    }

    #[test]
    fn three_keys_are_independent() {
        let shared = [0x11u8; 32];
        let keys = derive_session_keys(&shared, "salt").unwrap();
        assert_ne!(keys.k_c2a, keys.k_a2c);
        assert_ne!(keys.k_a2c, keys.k_control);
        assert_ne!(keys.k_c2a, keys.k_control);
    }

    #[test]
    fn salt_changes_every_key() {
        let shared = [0x11u8; 32];
        let a = derive_session_keys(&shared, "salt-a").unwrap();
        let b = derive_session_keys(&shared, "salt-b").unwrap();
        assert_ne!(a.k_c2a, b.k_c2a);
        assert_ne!(a.k_a2c, b.k_a2c);
        assert_ne!(a.k_control, b.k_control);
    }
}
