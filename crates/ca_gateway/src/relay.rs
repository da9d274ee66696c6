//! The relay seam the session layer programs against.
//!
//! `GatewayClient` is the production implementation; tests drive the state
//! machine with an in-process scripted relay instead of HTTP.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ca_proto::envelope::SessionMessageEnvelope;
use ca_proto::handshake::{
    AcceptShareResponse, ClientInitRequest, DeviceInfo, GrantInfo, HandshakeStatusResponse,
    IdentityKeyResponse, ShareInviteResponse,
};

use crate::error::GatewayError;
use crate::sse::SseEvent;

/// One item from a live event subscription. After `Fatal` the channel
/// closes; the subscriber decides the session's fate.
#[derive(Debug)]
pub enum StreamItem {
    Event(SseEvent),
    Fatal(GatewayError),
}

#[async_trait]
pub trait Relay: Send + Sync + 'static {
    async fn client_init(
        &self,
        session_id: &str,
        req: &ClientInitRequest,
    ) -> Result<(), GatewayError>;

    async fn handshake_status(
        &self,
        session_id: &str,
        handshake_id: &str,
    ) -> Result<HandshakeStatusResponse, GatewayError>;

    async fn identity_key(&self, device_id: &str) -> Result<IdentityKeyResponse, GatewayError>;

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, GatewayError>;

    /// Best-effort on profile delete.
    async fn deregister_device(&self, device_id: &str) -> Result<(), GatewayError>;

    async fn post_message(
        &self,
        session_id: &str,
        envelope: &SessionMessageEnvelope,
    ) -> Result<(), GatewayError>;

    /// Per-session event stream. Tolerates a bounded number of consecutive
    /// failures, then yields `Fatal`.
    async fn subscribe_session_events(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError>;

    /// Owner-wide device status stream. Retries until cancelled.
    async fn subscribe_device_events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError>;

    async fn create_share_invite(
        &self,
        device_id: &str,
    ) -> Result<ShareInviteResponse, GatewayError>;

    async fn accept_share_invite(&self, token: &str) -> Result<AcceptShareResponse, GatewayError>;

    async fn list_grants(&self, device_id: &str) -> Result<Vec<GrantInfo>, GatewayError>;

    async fn revoke_grant(&self, grant_id: &str) -> Result<(), GatewayError>;
}
