//! X25519 ephemeral key pairs and key agreement.
//!
//! One ephemeral pair per handshake. `EphemeralSecret` is consumed by the
//! agreement, so the private half cannot outlive the ECDH by construction;
//! the shared secret is handed out zeroize-on-drop.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// A freshly generated X25519 pair for one handshake.
pub struct HandshakeEphemeral {
    secret: EphemeralSecret,
    public_raw: [u8; 32],
}

impl HandshakeEphemeral {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public_raw = PublicKey::from(&secret).to_bytes();
        Self { secret, public_raw }
    }

    pub fn public_raw(&self) -> &[u8; 32] {
        &self.public_raw
    }

    /// Base64 SPKI form of the public half, as sent in client-init.
    pub fn public_spki_b64(&self) -> String {
        crate::spki::encode_x25519(&self.public_raw)
    }

    /// Run the agreement against the peer's raw public key, consuming the
    /// private half. Rejects non-contributory results (low-order peer keys).
    pub fn agree(self, peer_public_raw: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public_raw));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}
