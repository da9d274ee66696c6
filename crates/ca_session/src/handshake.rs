//! The four-round handshake, driven from the desktop as initiator.
//!
//! 1. client-init: fresh X25519 ephemeral + 16-byte nonce + session and
//!    handshake UUIDs, posted to the relay.
//! 2. The agent generates its own ephemeral and posts agent-ack with an
//!    Ed25519 signature over the transcript hash.
//! 3. Poll at 500 ms until acknowledged, within a 45 s overall window.
//!    Each poll has its own 10 s deadline; a transient per-poll failure
//!    does not abort the window.
//! 4. Fetch the peer's registered identity key, verify the transcript
//!    signature (failure means the relay tampered — fatal), run ECDH,
//!    derive the three session keys, and drop the ephemeral private key
//!    and shared secret.
//!
//! The agent's identity key never touches the relay's hands, so a
//! malicious relay cannot substitute its own ephemeral undetected.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ca_crypto::ecdh::HandshakeEphemeral;
use ca_crypto::identity::ed25519_verify_b64;
use ca_crypto::kdf::derive_session_keys;
use ca_crypto::spki;
use ca_crypto::transcript::{generate_client_nonce, transcript_hash};
use ca_crypto::{CryptoError, SessionKeys};
use ca_gateway::{GatewayError, Relay};
use ca_proto::device::validate_device_id;
use ca_proto::handshake::{ClientInitRequest, HandshakePhase, HandshakeStatusResponse};

use crate::error::SessionError;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const IDENTITY_ALGORITHM: &str = "Ed25519";

pub struct HandshakeOutcome {
    pub session_id: String,
    pub handshake_id: String,
    /// Conversation the agent bound this session to, if any.
    pub conversation_id: Option<String>,
    pub keys: SessionKeys,
}

pub async fn run_handshake(
    relay: &dyn Relay,
    peer_device_id: &str,
    conversation_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<HandshakeOutcome, SessionError> {
    validate_device_id(peer_device_id)?;

    let ephemeral = HandshakeEphemeral::generate();
    let client_eph_pub_b64 = ephemeral.public_spki_b64();
    let client_nonce_b64 = generate_client_nonce();
    let session_id = Uuid::new_v4().to_string();
    let handshake_id = Uuid::new_v4().to_string();

    tracing::info!(
        target: "commands_agent",
        event = "handshake_start",
        session_id = %session_id,
        handshake_id = %handshake_id,
        peer_device_id = %peer_device_id,
        resuming = conversation_id.is_some(),
    );

    relay
        .client_init(
            &session_id,
            &ClientInitRequest {
                handshake_id: handshake_id.clone(),
                device_id: peer_device_id.to_string(),
                client_ephemeral_public_key: client_eph_pub_b64.clone(),
                client_session_nonce: client_nonce_b64.clone(),
                conversation_id: conversation_id.map(str::to_string),
            },
        )
        .await?;

    let ack = poll_for_ack(relay, &session_id, &handshake_id, cancel).await?;

    let agent_eph_pub_b64 = ack
        .agent_ephemeral_public_key
        .ok_or_else(|| SessionError::HandshakeAborted("acknowledgement carried no ephemeral key".into()))?;
    let signature_b64 = ack
        .agent_identity_signature
        .ok_or_else(|| SessionError::HandshakeAborted("acknowledgement carried no signature".into()))?;

    // The identity key comes from a separate endpoint keyed by device_id,
    // registered out of band by the agent at profile init.
    let identity = relay.identity_key(peer_device_id).await?;
    if identity.algorithm != IDENTITY_ALGORITHM {
        return Err(CryptoError::Format(format!(
            "unsupported identity algorithm {:?}",
            identity.algorithm
        ))
        .into());
    }
    let agent_identity_pub = spki::decode_ed25519(&identity.public_key)?;

    let transcript = transcript_hash(
        &session_id,
        &handshake_id,
        &client_eph_pub_b64,
        &client_nonce_b64,
        &agent_eph_pub_b64,
    );
    match ed25519_verify_b64(&agent_identity_pub, &transcript, &signature_b64) {
        Ok(()) => {}
        Err(CryptoError::SignatureInvalid) => {
            tracing::error!(
                target: "commands_agent",
                event = "handshake_signature_invalid",
                session_id = %session_id,
                peer_device_id = %peer_device_id,
            );
            return Err(SessionError::SignatureInvalid);
        }
        Err(e) => return Err(e.into()),
    }

    // ECDH consumes the ephemeral private key; the shared secret lives
    // only until the HKDF below, then zeroizes on drop.
    let agent_eph_raw = spki::decode_x25519(&agent_eph_pub_b64)?;
    let shared = ephemeral.agree(&agent_eph_raw)?;
    let keys = derive_session_keys(&shared, &transcript)?;

    tracing::info!(
        target: "commands_agent",
        event = "handshake_complete",
        session_id = %session_id,
        handshake_id = %handshake_id,
        peer_device_id = %peer_device_id,
    );

    Ok(HandshakeOutcome {
        session_id,
        handshake_id,
        conversation_id: ack.conversation_id,
        keys,
    })
}

async fn poll_for_ack(
    relay: &dyn Relay,
    session_id: &str,
    handshake_id: &str,
    cancel: &CancellationToken,
) -> Result<HandshakeStatusResponse, SessionError> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::HandshakeAborted("cancelled".into()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SessionError::HandshakeTimeout);
        }

        let poll_budget = POLL_REQUEST_TIMEOUT.min(remaining);
        match tokio::time::timeout(poll_budget, relay.handshake_status(session_id, handshake_id)).await {
            // This poll timed out; the overall window decides.
            Err(_elapsed) => {}
            Ok(Err(GatewayError::Transient(reason))) => {
                tracing::debug!(
                    target: "commands_agent",
                    event = "handshake_poll_transient",
                    session_id = %session_id,
                    reason = %reason,
                );
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(status)) => {
                if let Some(session_status) = status.session_status.as_deref() {
                    if session_status != "handshaking" {
                        return Err(SessionError::HandshakeAborted(format!(
                            "session became {session_status} during handshake"
                        )));
                    }
                }
                match status.status {
                    HandshakePhase::AgentAcknowledged => return Ok(status),
                    HandshakePhase::Failed => {
                        return Err(SessionError::HandshakeAborted(
                            "agent rejected the handshake".into(),
                        ))
                    }
                    HandshakePhase::Pending | HandshakePhase::Unknown => {}
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SessionError::HandshakeAborted("cancelled".into()));
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}
