//! Scripted in-process relay for session tests.
//!
//! Plays both the relay and the remote agent: on client-init it generates
//! the agent ephemeral, signs the transcript with a real Ed25519 identity
//! key, and derives the same session keys the desktop will, so tests can
//! mint valid (or deliberately invalid) inbound frames.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use x25519_dalek::{PublicKey, StaticSecret};

use ca_crypto::identity::AgentIdentityKeyPair;
use ca_crypto::kdf::derive_session_keys;
use ca_crypto::spki;
use ca_crypto::transcript::transcript_hash;
use ca_gateway::{GatewayError, Relay, SseEvent, StreamItem};
use ca_proto::envelope::SessionMessageEnvelope;
use ca_proto::frame::{open_frame, seal_frame, Direction};
use ca_proto::handshake::{
    AcceptShareResponse, ClientInitRequest, DeviceInfo, GrantInfo, HandshakePhase,
    HandshakeStatusResponse, IdentityKeyResponse, ShareInviteResponse,
};
use ca_session::SessionEvent;

pub struct SessionKeysPair {
    pub k_c2a: [u8; 32],
    pub k_a2c: [u8; 32],
}

struct HandshakeRecord {
    agent_eph_pub_b64: String,
    signature_b64: String,
    conversation_id: Option<String>,
    pending_polls: u32,
}

#[derive(Default)]
struct Shared {
    handshakes: HashMap<String, HandshakeRecord>,
    keys: HashMap<String, SessionKeysPair>,
    streams: HashMap<String, mpsc::Sender<StreamItem>>,
    posted: Vec<SessionMessageEnvelope>,
    post_failures: VecDeque<GatewayError>,
    client_inits: Vec<ClientInitRequest>,
    accepted_tokens: Vec<String>,
    mitm: bool,
    ack_delay_polls: u32,
    /// Conversation the agent binds when the client asked for none (or a
    /// different one on purpose).
    conversation_override: Option<String>,
}

pub struct MockRelay {
    pub identity: AgentIdentityKeyPair,
    mitm_identity: AgentIdentityKeyPair,
    shared: Mutex<Shared>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self {
            identity: AgentIdentityKeyPair::generate(),
            mitm_identity: AgentIdentityKeyPair::generate(),
            shared: Mutex::new(Shared::default()),
        }
    }

    pub fn set_mitm(&self, on: bool) {
        self.shared.lock().unwrap().mitm = on;
    }

    pub fn set_ack_delay_polls(&self, polls: u32) {
        self.shared.lock().unwrap().ack_delay_polls = polls;
    }

    pub fn set_conversation_override(&self, conversation: Option<&str>) {
        self.shared.lock().unwrap().conversation_override = conversation.map(str::to_string);
    }

    pub fn queue_post_failure(&self, err: GatewayError) {
        self.shared.lock().unwrap().post_failures.push_back(err);
    }

    pub fn posted(&self) -> Vec<SessionMessageEnvelope> {
        self.shared.lock().unwrap().posted.clone()
    }

    pub fn client_inits(&self) -> Vec<ClientInitRequest> {
        self.shared.lock().unwrap().client_inits.clone()
    }

    pub fn accepted_tokens(&self) -> Vec<String> {
        self.shared.lock().unwrap().accepted_tokens.clone()
    }

    pub fn session_keys(&self, session_id: &str) -> SessionKeysPair {
        let shared = self.shared.lock().unwrap();
        let keys = shared.keys.get(session_id).expect("keys for session");
        SessionKeysPair {
            k_c2a: keys.k_c2a,
            k_a2c: keys.k_a2c,
        }
    }

    /// Decrypt a frame the desktop posted, as the agent would.
    pub fn open_posted(&self, envelope: &SessionMessageEnvelope) -> Vec<u8> {
        let keys = self.session_keys(&envelope.session_id);
        open_frame(
            &keys.k_c2a,
            &envelope.session_id,
            &envelope.message_id,
            &envelope.frame,
        )
        .expect("decrypt posted frame")
        .to_vec()
    }

    /// Build a valid agent→client frame and push it down the session's
    /// event stream.
    pub async fn inject_agent_reply(&self, session_id: &str, seq: u64, payload: &serde_json::Value) {
        let envelope = self.build_agent_envelope(session_id, seq, payload);
        self.inject_raw(
            session_id,
            SseEvent {
                event: "session.message".into(),
                data: serde_json::to_string(&envelope).unwrap(),
                id: Some(format!("evt-{session_id}-{seq}")),
            },
        )
        .await;
    }

    pub fn build_agent_envelope(
        &self,
        session_id: &str,
        seq: u64,
        payload: &serde_json::Value,
    ) -> SessionMessageEnvelope {
        let keys = self.session_keys(session_id);
        let message_id = format!("agent-msg-{seq}");
        let frame = seal_frame(
            &keys.k_a2c,
            Direction::AgentToClient,
            seq,
            session_id,
            &message_id,
            payload.to_string().as_bytes(),
        )
        .expect("seal agent frame");
        SessionMessageEnvelope::new(session_id, "hid-agent", &message_id, frame)
    }

    pub async fn inject_raw(&self, session_id: &str, event: SseEvent) {
        let tx = {
            let shared = self.shared.lock().unwrap();
            shared.streams.get(session_id).expect("stream").clone()
        };
        tx.send(StreamItem::Event(event)).await.expect("stream open");
    }

    pub async fn inject_fatal(&self, session_id: &str, err: GatewayError) {
        let tx = {
            let shared = self.shared.lock().unwrap();
            shared.streams.get(session_id).expect("stream").clone()
        };
        tx.send(StreamItem::Fatal(err)).await.expect("stream open");
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn client_init(
        &self,
        session_id: &str,
        req: &ClientInitRequest,
    ) -> Result<(), GatewayError> {
        let agent_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let agent_pub = PublicKey::from(&agent_secret);
        let agent_eph_pub_b64 = spki::encode_x25519(agent_pub.as_bytes());

        let transcript = transcript_hash(
            session_id,
            &req.handshake_id,
            &req.client_ephemeral_public_key,
            &req.client_session_nonce,
            &agent_eph_pub_b64,
        );

        let mut shared = self.shared.lock().unwrap();
        let signer = if shared.mitm {
            &self.mitm_identity
        } else {
            &self.identity
        };
        let signature_b64 = STANDARD.encode(signer.sign(transcript.as_bytes()));

        let client_pub = spki::decode_x25519(&req.client_ephemeral_public_key)
            .map_err(|e| GatewayError::Api { status: 400, body: e.to_string() })?;
        let dh = agent_secret.diffie_hellman(&PublicKey::from(client_pub));
        let keys = derive_session_keys(dh.as_bytes(), &transcript)
            .map_err(|e| GatewayError::Api { status: 500, body: e.to_string() })?;
        shared.keys.insert(
            session_id.to_string(),
            SessionKeysPair {
                k_c2a: keys.k_c2a,
                k_a2c: keys.k_a2c,
            },
        );

        let conversation_id = shared
            .conversation_override
            .clone()
            .or_else(|| req.conversation_id.clone());
        let pending_polls = shared.ack_delay_polls;
        shared.handshakes.insert(
            session_id.to_string(),
            HandshakeRecord {
                agent_eph_pub_b64,
                signature_b64,
                conversation_id,
                pending_polls,
            },
        );
        shared.client_inits.push(req.clone());
        Ok(())
    }

    async fn handshake_status(
        &self,
        session_id: &str,
        _handshake_id: &str,
    ) -> Result<HandshakeStatusResponse, GatewayError> {
        let mut shared = self.shared.lock().unwrap();
        let record = shared
            .handshakes
            .get_mut(session_id)
            .ok_or(GatewayError::Gone)?;
        if record.pending_polls > 0 {
            record.pending_polls -= 1;
            return Ok(HandshakeStatusResponse {
                status: HandshakePhase::Pending,
                session_status: Some("handshaking".into()),
                agent_ephemeral_public_key: None,
                agent_identity_signature: None,
                conversation_id: None,
            });
        }
        Ok(HandshakeStatusResponse {
            status: HandshakePhase::AgentAcknowledged,
            session_status: Some("handshaking".into()),
            agent_ephemeral_public_key: Some(record.agent_eph_pub_b64.clone()),
            agent_identity_signature: Some(record.signature_b64.clone()),
            conversation_id: record.conversation_id.clone(),
        })
    }

    async fn identity_key(&self, _device_id: &str) -> Result<IdentityKeyResponse, GatewayError> {
        Ok(IdentityKeyResponse {
            algorithm: "Ed25519".into(),
            public_key: self.identity.public_spki_b64(),
        })
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, GatewayError> {
        Ok(Vec::new())
    }

    async fn deregister_device(&self, _device_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn post_message(
        &self,
        _session_id: &str,
        envelope: &SessionMessageEnvelope,
    ) -> Result<(), GatewayError> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(err) = shared.post_failures.pop_front() {
            return Err(err);
        }
        shared.posted.push(envelope.clone());
        Ok(())
    }

    async fn subscribe_session_events(
        &self,
        session_id: &str,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        let (tx, rx) = mpsc::channel(64);
        self.shared
            .lock()
            .unwrap()
            .streams
            .insert(session_id.to_string(), tx);
        Ok(rx)
    }

    async fn subscribe_device_events(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamItem>, GatewayError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn create_share_invite(
        &self,
        device_id: &str,
    ) -> Result<ShareInviteResponse, GatewayError> {
        let _ = device_id;
        Ok(ShareInviteResponse {
            token: "minted-token-0123456789".into(),
            expires_at: None,
        })
    }

    async fn accept_share_invite(&self, token: &str) -> Result<AcceptShareResponse, GatewayError> {
        self.shared
            .lock()
            .unwrap()
            .accepted_tokens
            .push(token.to_string());
        Ok(AcceptShareResponse {
            device_id: test_device_id(0xaa),
            device_name: Some("shared-box".into()),
        })
    }

    async fn list_grants(&self, _device_id: &str) -> Result<Vec<GrantInfo>, GatewayError> {
        Ok(Vec::new())
    }

    async fn revoke_grant(&self, _grant_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub fn test_device_id(fill: u8) -> String {
    format!("dev_{}", format!("{fill:02x}").repeat(16))
}

/// Await the next UI event, with a deadline so a missing event fails the
/// test instead of hanging it.
pub async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}
