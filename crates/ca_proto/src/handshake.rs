//! Handshake and gateway REST JSON shapes.

use serde::{Deserialize, Serialize};

/// POST /gateway/v1/sessions/{sid}/handshake/client-init
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInitRequest {
    pub handshake_id: String,
    /// Peer device the session targets.
    pub device_id: String,
    /// Base64 X25519 SPKI.
    pub client_ephemeral_public_key: String,
    /// Base64 16-byte random nonce.
    pub client_session_nonce: String,
    /// Resume prior conversational state on the peer when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    Pending,
    AgentAcknowledged,
    Failed,
    #[serde(other)]
    Unknown,
}

/// GET /gateway/v1/sessions/{sid}/handshake/{hid}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeStatusResponse {
    pub status: HandshakePhase,
    /// Session status as the relay sees it; anything other than
    /// "handshaking" aborts the poll loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_status: Option<String>,
    /// Base64 X25519 SPKI, present once acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_ephemeral_public_key: Option<String>,
    /// Base64 Ed25519 signature over the transcript hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_identity_signature: Option<String>,
    /// Conversation the agent bound this session to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// GET /gateway/v1/devices/{device_id}/identity-key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKeyResponse {
    /// Always "Ed25519"; anything else fails closed.
    pub algorithm: String,
    /// Base64 Ed25519 SPKI.
    pub public_key: String,
}

/// One entry from GET /gateway/v1/devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
}

// ── Share API ────────────────────────────────────────────────────────────────

/// POST /api/gateway/shares/invites
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInviteRequest {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInviteResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// POST /api/gateway/shares/invites/accept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptShareRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptShareResponse {
    /// Device the caller was granted access to.
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// One entry from GET /api/gateway/shares/devices/{did}/grants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantInfo {
    pub grant_id: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grantee_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_phase_does_not_fail_deserialisation() {
        let resp: HandshakeStatusResponse =
            serde_json::from_str(r#"{"status":"some_future_phase"}"#).unwrap();
        assert_eq!(resp.status, HandshakePhase::Unknown);
    }

    #[test]
    fn acknowledged_response_carries_agent_material() {
        let resp: HandshakeStatusResponse = serde_json::from_str(
            r#"{"status":"agent_acknowledged","agent_ephemeral_public_key":"a","agent_identity_signature":"b"}"#,
        )
        .unwrap();
        assert_eq!(resp.status, HandshakePhase::AgentAcknowledged);
        assert_eq!(resp.agent_ephemeral_public_key.as_deref(), Some("a"));
    }

    #[test]
    fn client_init_omits_absent_conversation_id() {
        let req = ClientInitRequest {
            handshake_id: "h".into(),
            device_id: "d".into(),
            client_ephemeral_public_key: "k".into(),
            client_session_nonce: "n".into(),
            conversation_id: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("conversation_id"));
    }
}
