use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("OS keychain unavailable: {0}")]
    KeychainUnavailable(String),

    #[error("Config is secured but the keychain is unavailable — refusing to downgrade")]
    SecuredWithoutKeychain,

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error(transparent)]
    Crypto(#[from] ca_crypto::CryptoError),
}
