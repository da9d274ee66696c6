use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Origin not in trusted list: {0}")]
    UntrustedOrigin(String),

    #[error("Unsafe URL scheme: {0}")]
    UnsafeScheme(String),

    #[error("Not authenticated (token refresh did not help)")]
    Unauthenticated,

    #[error("Resource gone (404)")]
    Gone,

    #[error("Transient relay failure: {0}")]
    Transient(String),

    #[error("Relay returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("SSE stream overflow: {0}")]
    EventOverflow(String),

    #[error("Event stream failed {attempts} consecutive times")]
    SubscriptionFailed { attempts: u32 },

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transient(e.to_string())
    }
}
