//! Long-term Ed25519 agent identity keys.
//!
//! Each profile owns one identity pair, created at profile init and
//! persisted encrypted by the credential vault. The public half is
//! registered with the relay keyed by `device_id`; the pair is never
//! regenerated except on an explicit user "rotate identity".
//!
//! The desktop side mostly *verifies* — the agent runtime signs the
//! handshake transcript with this key and the desktop checks that signature
//! against the registered public key, which is what defeats a relay MITM.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Ed25519 identity pair. Drop clears the seed via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct AgentIdentityKeyPair {
    #[zeroize(skip)]
    public_raw: [u8; 32],
    seed: [u8; 32],
}

impl AgentIdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public_raw: signing_key.verifying_key().to_bytes(),
            seed: signing_key.to_bytes(),
        }
    }

    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = seed
            .try_into()
            .map_err(|_| CryptoError::Format(format!("Identity seed must be 32 bytes, got {}", seed.len())))?;
        let signing_key = SigningKey::from_bytes(&arr);
        Ok(Self {
            public_raw: signing_key.verifying_key().to_bytes(),
            seed: arr,
        })
    }

    pub fn seed_bytes(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn public_raw(&self) -> &[u8; 32] {
        &self.public_raw
    }

    /// Base64 SPKI form, as registered with the relay.
    pub fn public_spki_b64(&self) -> String {
        crate::spki::encode_ed25519(&self.public_raw)
    }

    /// Sign arbitrary bytes; returns the raw 64-byte signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.seed).sign(msg).to_bytes()
    }
}

/// Verify a signature made by a raw 32-byte Ed25519 public key.
pub fn ed25519_verify(public_raw: &[u8; 32], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(public_raw)
        .map_err(|e| CryptoError::Format(format!("Bad Ed25519 public key: {e}")))?;
    let sig_arr: [u8; 64] = sig
        .try_into()
        .map_err(|_| CryptoError::Format(format!("Signature must be 64 bytes, got {}", sig.len())))?;
    vk.verify(msg, &Signature::from_bytes(&sig_arr))
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Verify a base64-encoded signature over a string message.
pub fn ed25519_verify_b64(
    public_raw: &[u8; 32],
    msg: &str,
    sig_b64: &str,
) -> Result<(), CryptoError> {
    let sig = STANDARD
        .decode(sig_b64)
        .map_err(|e| CryptoError::Format(format!("Signature is not valid base64: {e}")))?;
    ed25519_verify(public_raw, msg.as_bytes(), &sig)
}

/// Human-readable fingerprint of a public key for the trust surface:
/// SHA-256 of the raw key, first 20 bytes hex in groups of 4.
pub fn fingerprint(public_raw: &[u8; 32]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(public_raw);
    let hex = hex::encode(&hash[..20]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ")
}
