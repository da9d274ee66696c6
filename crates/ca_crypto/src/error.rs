use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Malformed key material: {0}")]
    Format(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    DecryptFailure,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Key agreement produced a non-contributory shared secret")]
    NonContributory,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
