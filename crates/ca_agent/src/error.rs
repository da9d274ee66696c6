use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error(transparent)]
    Store(#[from] ca_store::StoreError),
}
