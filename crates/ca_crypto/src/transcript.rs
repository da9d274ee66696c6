//! Handshake transcript hash.
//!
//! `base64(SHA256(session_id "|" handshake_id "|" client_eph_pub_b64 "|"
//! client_nonce_b64 "|" agent_eph_pub_b64))` — bit-exact on both sides.
//! The agent signs this string with its identity key; the client reuses it
//! as the HKDF salt, so a relay that alters any handshake field invalidates
//! both the signature and the derived keys.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

pub const CLIENT_NONCE_LEN: usize = 16;

/// Compute the transcript hash over the five handshake inputs.
pub fn transcript_hash(
    session_id: &str,
    handshake_id: &str,
    client_eph_pub_b64: &str,
    client_nonce_b64: &str,
    agent_eph_pub_b64: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"|");
    hasher.update(handshake_id.as_bytes());
    hasher.update(b"|");
    hasher.update(client_eph_pub_b64.as_bytes());
    hasher.update(b"|");
    hasher.update(client_nonce_b64.as_bytes());
    hasher.update(b"|");
    hasher.update(agent_eph_pub_b64.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Random 16-byte client session nonce, base64-encoded for the wire.
pub fn generate_client_nonce() -> String {
    use rand::RngCore;
    let mut nonce = [0u8; CLIENT_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: [&str; 5] = ["sid", "hid", "ceph", "cnonce", "aeph"];

    fn hash_of(fields: &[&str; 5]) -> String {
        transcript_hash(fields[0], fields[1], fields[2], fields[3], fields[4])
    }

    #[test]
    fn identical_inputs_hash_identically() {
        assert_eq!(hash_of(&FIELDS), hash_of(&FIELDS));
    }

    #[test]
    fn every_field_is_bound() {
        let base = hash_of(&FIELDS);
        for i in 0..5 {
            let mut mutated = FIELDS;
            let changed = format!("{}x", FIELDS[i]);
            mutated[i] = &changed;
            assert_ne!(base, hash_of(&mutated), "field {i} not bound");
        }
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // Moving a byte across the "|" separator must change the hash.
        let a = transcript_hash("ab", "c", "x", "y", "z");
        let b = transcript_hash("a", "bc", "x", "y", "z");
        assert_ne!(a, b);
    }

    #[test]
    fn client_nonce_is_16_bytes() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let nonce = generate_client_nonce();
        assert_eq!(STANDARD.decode(nonce).unwrap().len(), CLIENT_NONCE_LEN);
    }
}
