//! Sign-in state.
//!
//! `AuthStatus` carries the tokens and stays on this side of the trust
//! boundary; everything shown to the UI goes through `AuthStatusView`,
//! which has no secret fields at all.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AgentConfig;

#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub signed_in: bool,
    pub owner_uid: Option<String>,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub gateway_url: String,
}

/// UI-facing view: no token fields exist here, so they cannot leak by
/// serialisation mistake.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatusView {
    pub signed_in: bool,
    pub owner_uid: Option<String>,
    pub email: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub gateway_url: String,
}

impl AuthStatus {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            signed_in: config.access_token.is_some(),
            owner_uid: config.owner_uid.clone(),
            email: config.email.clone(),
            access_token: config.access_token.clone(),
            refresh_token: config.refresh_token.clone(),
            token_expires_at: config.token_expires_at,
            gateway_url: config.gateway_url.clone(),
        }
    }

    pub fn view(&self) -> AuthStatusView {
        AuthStatusView {
            signed_in: self.signed_in,
            owner_uid: self.owner_uid.clone(),
            email: self.email.clone(),
            token_expires_at: self.token_expires_at,
            gateway_url: self.gateway_url.clone(),
        }
    }
}
