use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Malformed frame: {0}")]
    Format(String),

    #[error("Sequence violation: {0}")]
    SequenceViolation(String),

    #[error("Prompt exceeds {max} characters ({got})")]
    PromptTooLong { max: usize, got: usize },

    #[error("Invalid share token")]
    InvalidShareToken,

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error(transparent)]
    Crypto(#[from] ca_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
