//! Share-token staging and consumption.
//!
//! The relay is the sole authority for minting, consuming, and revoking
//! share tokens; this service normalizes the three input surfaces and
//! holds at most one pending token (5-minute TTL) for the sign-in-gated
//! deep-link flow: stage while signed out, consume exactly once on the
//! next sign-in, cleared on sign-out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use ca_gateway::Relay;
use ca_proto::handshake::{AcceptShareResponse, GrantInfo, ShareInviteResponse};
use ca_proto::share::normalize_share_input;

use crate::error::SessionError;

pub const PENDING_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct PendingShareToken {
    pub token: String,
    staged_at: Instant,
}

impl PendingShareToken {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.staged_at) >= PENDING_TOKEN_TTL
    }
}

pub struct ShareTokenService {
    relay: Arc<dyn Relay>,
    pending: Mutex<Option<PendingShareToken>>,
}

impl ShareTokenService {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self {
            relay,
            pending: Mutex::new(None),
        }
    }

    /// Stage a token for consumption after sign-in. A prior pending token
    /// is replaced (last writer wins) with a warning.
    pub async fn stage(&self, input: &str) -> Result<(), SessionError> {
        self.stage_at(input, Instant::now()).await
    }

    pub async fn stage_at(&self, input: &str, now: Instant) -> Result<(), SessionError> {
        let token = normalize_share_input(input)?;
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            tracing::warn!(
                target: "commands_agent",
                event = "pending_share_token_replaced",
            );
        }
        *pending = Some(PendingShareToken { token, staged_at: now });
        Ok(())
    }

    /// Consume the pending token after sign-in, exactly once. An expired
    /// token is dropped without a relay call; no pending token is a no-op.
    pub async fn consume_pending(&self) -> Result<Option<AcceptShareResponse>, SessionError> {
        self.consume_pending_at(Instant::now()).await
    }

    pub async fn consume_pending_at(
        &self,
        now: Instant,
    ) -> Result<Option<AcceptShareResponse>, SessionError> {
        // Take the slot before any await so a concurrent sign-in cannot
        // consume the same token twice.
        let staged = self.pending.lock().await.take();
        let Some(staged) = staged else {
            return Ok(None);
        };
        if staged.is_expired_at(now) {
            tracing::info!(
                target: "commands_agent",
                event = "pending_share_token_expired",
            );
            return Ok(None);
        }
        let resp = self.relay.accept_share_invite(&staged.token).await?;
        Ok(Some(resp))
    }

    /// Authenticated direct consume (no staging).
    pub async fn consume(&self, input: &str) -> Result<AcceptShareResponse, SessionError> {
        let token = normalize_share_input(input)?;
        Ok(self.relay.accept_share_invite(&token).await?)
    }

    /// Sign-out clears any pending token.
    pub async fn clear(&self) {
        *self.pending.lock().await = None;
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    pub async fn mint(&self, device_id: &str) -> Result<ShareInviteResponse, SessionError> {
        Ok(self.relay.create_share_invite(device_id).await?)
    }

    pub async fn grants(&self, device_id: &str) -> Result<Vec<GrantInfo>, SessionError> {
        Ok(self.relay.list_grants(device_id).await?)
    }

    pub async fn revoke(&self, grant_id: &str) -> Result<(), SessionError> {
        Ok(self.relay.revoke_grant(grant_id).await?)
    }
}
