//! Token provider seam.
//!
//! The gateway client never stores tokens; it asks this provider for the
//! current access token per request and for a forced refresh exactly once
//! when a request comes back 401. The provider owns the OAuth refresh flow
//! and the at-rest protection of both tokens.

use async_trait::async_trait;

use crate::error::GatewayError;

#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Current access token, refreshing transparently if it is known-expired.
    async fn access_token(&self) -> Result<String, GatewayError>;

    /// Force a refresh through the OAuth refresh endpoint and return the
    /// new access token. Called after a 401.
    async fn force_refresh(&self) -> Result<String, GatewayError>;
}

/// Fixed-token provider for tests and local development.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, GatewayError> {
        Ok(self.token.clone())
    }

    async fn force_refresh(&self) -> Result<String, GatewayError> {
        Err(GatewayError::TokenRefresh("static token cannot refresh".into()))
    }
}
