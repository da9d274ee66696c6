//! Per-peer session registry and lifecycle.
//!
//! One session per peer device, at most 20 active. Components reference a
//! session through its registry key (the peer device id) and revalidate on
//! each touch via a generation counter, so the SSE reader, send path, and
//! teardown never hold a stale handle and terminal cleanup is a single map
//! removal.
//!
//! Lifecycle: `idle → handshaking → ready → ending → ended | error`.
//! Every exit from `ready` runs the same terminal cleanup exactly once:
//! cancel both tokens, zeroize the three keys, drop the registry entry and
//! its serialized-send queue, emit at most one terminal event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use ca_crypto::SessionKeys;
use ca_gateway::{GatewayError, Relay, SseEvent, StreamItem};
use ca_proto::envelope::SessionMessageEnvelope;
use ca_proto::frame::{open_frame, seal_frame, Direction};
use ca_proto::payload::{classify_payload_bytes, AgentPayload, UserMessage};
use ca_proto::ProtoError;

use crate::error::{SessionError, UiError};
use crate::events::SessionEvent;
use crate::handshake::run_handshake;
use crate::limiter::RateLimiter;

/// Concurrent sessions (handshaking or ready) per signed-in user.
pub const MAX_ACTIVE_SESSIONS: usize = 20;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Handshaking,
    Ready,
    Ending,
    Ended,
    Error,
}

impl SessionStatus {
    fn is_active(self) -> bool {
        matches!(self, SessionStatus::Handshaking | SessionStatus::Ready)
    }
}

struct Session {
    session_id: String,
    handshake_id: String,
    status: SessionStatus,
    /// None until ready; None again after terminal cleanup.
    keys: Option<SessionKeys>,
    next_out_seq: u64,
    next_in_seq: u64,
    conversation_id: Option<String>,
    last_activity: DateTime<Utc>,
}

struct SessionSlot {
    session: Session,
    /// Revalidation token: a task holding (peer, generation) only acts on
    /// the slot while both still match.
    generation: u64,
    /// Serialized-send queue: the next send cannot begin until the
    /// previous POST returns.
    send_lock: Arc<Mutex<()>>,
    sse_cancel: CancellationToken,
    handshake_cancel: CancellationToken,
}

enum Terminal {
    Ended,
    Error(UiError),
    /// Cleanup without a terminal event (transparent reconnect path).
    Silent,
}

enum InboundAction {
    Emit(SessionEvent),
    PeerEnded,
    PeerError(String),
}

struct Inner {
    relay: Arc<dyn Relay>,
    events: mpsc::Sender<SessionEvent>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    limiter: Mutex<RateLimiter>,
    /// Last conversation id seen per peer, so a reconnect can ask the
    /// agent to resume it.
    resume_hints: Mutex<HashMap<String, String>>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(relay: Arc<dyn Relay>) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let manager = Self {
            inner: Arc::new(Inner {
                relay,
                events: tx,
                sessions: Mutex::new(HashMap::new()),
                limiter: Mutex::new(RateLimiter::default()),
                resume_hints: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(1),
            }),
        };
        (manager, rx)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Open a session with a peer device: handshake, subscribe, ready.
    /// Returns the new session id.
    pub async fn start_session(
        &self,
        peer_device_id: &str,
        conversation_id: Option<String>,
    ) -> Result<String, SessionError> {
        self.establish(peer_device_id, conversation_id.as_deref()).await
    }

    /// User-initiated disconnect: `ready → ending → ended`.
    pub async fn end_session(&self, peer_device_id: &str) -> Result<(), SessionError> {
        {
            let mut sessions = self.inner.sessions.lock().await;
            let slot = sessions
                .get_mut(peer_device_id)
                .ok_or(SessionError::NoSession)?;
            slot.session.status = SessionStatus::Ending;
        }
        self.teardown(peer_device_id, None, Terminal::Ended).await;
        Ok(())
    }

    /// Sign-out: end every session and clear the process-wide tables.
    pub async fn sign_out(&self) {
        let peers: Vec<String> = {
            let sessions = self.inner.sessions.lock().await;
            sessions.keys().cloned().collect()
        };
        for peer in peers {
            self.teardown(&peer, None, Terminal::Ended).await;
        }
        *self.inner.limiter.lock().await = RateLimiter::default();
        self.inner.resume_hints.lock().await.clear();
    }

    pub async fn status(&self, peer_device_id: &str) -> Option<SessionStatus> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(peer_device_id).map(|s| s.session.status)
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .values()
            .filter(|s| s.session.status.is_active())
            .count()
    }

    // ── Send path ────────────────────────────────────────────────────────────

    /// Send one user prompt to the peer. Sends are serialized per session;
    /// the sequence number advances only after the relay accepts the frame.
    /// A 404 (expired session) triggers one transparent reconnect and one
    /// resend; a second failure propagates.
    pub async fn send_prompt(
        &self,
        peer_device_id: &str,
        prompt: &str,
    ) -> Result<String, SessionError> {
        {
            let mut limiter = self.inner.limiter.lock().await;
            if !limiter.try_acquire(peer_device_id, Instant::now()) {
                return Err(SessionError::RateLimited);
            }
        }
        let message_id = Uuid::new_v4().to_string();

        let has_session = {
            let sessions = self.inner.sessions.lock().await;
            sessions.contains_key(peer_device_id)
        };
        if !has_session {
            // The session expired earlier (e.g. terminal SSE 404); this
            // send is what brings it back.
            self.emit(SessionEvent::Reconnecting {
                session_id: None,
                peer_device_id: peer_device_id.to_string(),
            })
            .await;
            self.reconnect(peer_device_id).await?;
            let session_id = self.send_once(peer_device_id, prompt, &message_id).await?;
            self.emit(SessionEvent::MessageSent {
                session_id,
                message_id: message_id.clone(),
            })
            .await;
            return Ok(message_id);
        }

        match self.send_once(peer_device_id, prompt, &message_id).await {
            Ok(session_id) => {
                self.emit(SessionEvent::MessageSent {
                    session_id,
                    message_id: message_id.clone(),
                })
                .await;
                Ok(message_id)
            }
            Err(SessionError::Gateway(GatewayError::Gone)) => {
                let old_session_id = {
                    let sessions = self.inner.sessions.lock().await;
                    sessions
                        .get(peer_device_id)
                        .map(|s| s.session.session_id.clone())
                };
                tracing::info!(
                    target: "commands_agent",
                    event = "session_expired_on_send",
                    peer_device_id = %peer_device_id,
                    message_id = %message_id,
                );
                self.teardown(peer_device_id, None, Terminal::Silent).await;
                self.emit(SessionEvent::Reconnecting {
                    session_id: old_session_id,
                    peer_device_id: peer_device_id.to_string(),
                })
                .await;
                self.reconnect(peer_device_id).await?;
                // Retry exactly once; a second failure propagates.
                let session_id = self.send_once(peer_device_id, prompt, &message_id).await?;
                self.emit(SessionEvent::MessageSent {
                    session_id,
                    message_id: message_id.clone(),
                })
                .await;
                Ok(message_id)
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(
        &self,
        peer_device_id: &str,
        prompt: &str,
        message_id: &str,
    ) -> Result<String, SessionError> {
        let send_lock = {
            let sessions = self.inner.sessions.lock().await;
            let slot = sessions
                .get(peer_device_id)
                .ok_or(SessionError::NoSession)?;
            slot.send_lock.clone()
        };
        // Serialize: held across the POST so a later send never starts
        // before this network call completes.
        let _serialized = send_lock.lock().await;

        let (session_id, handshake_id, seq, key, generation) = {
            let sessions = self.inner.sessions.lock().await;
            let slot = sessions
                .get(peer_device_id)
                .ok_or(SessionError::NoSession)?;
            if slot.session.status != SessionStatus::Ready {
                return Err(SessionError::NotReady);
            }
            let keys = slot.session.keys.as_ref().ok_or(SessionError::NotReady)?;
            (
                slot.session.session_id.clone(),
                slot.session.handshake_id.clone(),
                slot.session.next_out_seq,
                Zeroizing::new(keys.k_c2a),
                slot.generation,
            )
        };

        let plaintext = UserMessage {
            session_id: session_id.clone(),
            message_id: message_id.to_string(),
            prompt: prompt.to_string(),
        }
        .encode()?;
        let frame = seal_frame(
            &key,
            Direction::ClientToAgent,
            seq,
            &session_id,
            message_id,
            &plaintext,
        )?;
        let envelope = SessionMessageEnvelope::new(&session_id, &handshake_id, message_id, frame);

        self.inner.relay.post_message(&session_id, &envelope).await?;

        // Success: consume the sequence number. A failed send leaves the
        // counter untouched so retries begin fresh on a new handshake.
        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(slot) = sessions.get_mut(peer_device_id) {
                if slot.generation == generation {
                    slot.session.next_out_seq += 1;
                    slot.session.last_activity = Utc::now();
                }
            }
        }
        tracing::info!(
            target: "commands_agent",
            event = "message_sent",
            session_id = %session_id,
            message_id = %message_id,
            seq,
        );
        Ok(session_id)
    }

    // ── Establish / reconnect ────────────────────────────────────────────────

    async fn reconnect(&self, peer_device_id: &str) -> Result<String, SessionError> {
        let hint = {
            let hints = self.inner.resume_hints.lock().await;
            hints.get(peer_device_id).cloned()
        };
        self.establish(peer_device_id, hint.as_deref()).await
    }

    async fn establish(
        &self,
        peer_device_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<String, SessionError> {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
        let sse_cancel = CancellationToken::new();
        let handshake_cancel = CancellationToken::new();

        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(existing) = sessions.get(peer_device_id) {
                if existing.session.status.is_active()
                    || existing.session.status == SessionStatus::Ending
                {
                    return Err(SessionError::DuplicateSession);
                }
                sessions.remove(peer_device_id);
            }
            let active = sessions
                .values()
                .filter(|s| s.session.status.is_active())
                .count();
            if active >= MAX_ACTIVE_SESSIONS {
                return Err(SessionError::TooManySessions(active));
            }
            sessions.insert(
                peer_device_id.to_string(),
                SessionSlot {
                    session: Session {
                        session_id: String::new(),
                        handshake_id: String::new(),
                        status: SessionStatus::Handshaking,
                        keys: None,
                        next_out_seq: 0,
                        next_in_seq: 0,
                        conversation_id: None,
                        last_activity: Utc::now(),
                    },
                    generation,
                    send_lock: Arc::new(Mutex::new(())),
                    sse_cancel: sse_cancel.clone(),
                    handshake_cancel: handshake_cancel.clone(),
                },
            );
        }

        let outcome = match run_handshake(
            self.inner.relay.as_ref(),
            peer_device_id,
            conversation_id,
            &handshake_cancel,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.teardown(peer_device_id, Some(generation), Terminal::Error(err.to_ui()))
                    .await;
                return Err(err);
            }
        };

        let stream = match self
            .inner
            .relay
            .subscribe_session_events(&outcome.session_id, sse_cancel.clone())
            .await
        {
            Ok(rx) => rx,
            Err(err) => {
                let err = SessionError::from(err);
                self.teardown(peer_device_id, Some(generation), Terminal::Error(err.to_ui()))
                    .await;
                return Err(err);
            }
        };

        let conversation_reset = conversation_id.is_some()
            && outcome.conversation_id.as_deref() != conversation_id;
        let session_id = outcome.session_id.clone();
        let agent_conversation = outcome.conversation_id.clone();

        let filled = {
            let mut sessions = self.inner.sessions.lock().await;
            match sessions.get_mut(peer_device_id) {
                Some(slot) if slot.generation == generation => {
                    slot.session.session_id = outcome.session_id;
                    slot.session.handshake_id = outcome.handshake_id;
                    slot.session.keys = Some(outcome.keys);
                    slot.session.status = SessionStatus::Ready;
                    slot.session.next_out_seq = 1;
                    slot.session.next_in_seq = 1;
                    slot.session.conversation_id = agent_conversation.clone();
                    slot.session.last_activity = Utc::now();
                    true
                }
                // Torn down while we were handshaking; the fresh keys in
                // `outcome` zeroize on drop.
                _ => false,
            }
        };
        if !filled {
            return Err(SessionError::HandshakeAborted(
                "session closed during handshake".into(),
            ));
        }

        if let Some(cid) = agent_conversation.clone() {
            self.inner
                .resume_hints
                .lock()
                .await
                .insert(peer_device_id.to_string(), cid);
        }

        self.spawn_stream_task(peer_device_id.to_string(), generation, stream);
        self.emit(SessionEvent::Ready {
            session_id: session_id.clone(),
            peer_device_id: peer_device_id.to_string(),
            conversation_id: agent_conversation,
            conversation_reset,
        })
        .await;
        Ok(session_id)
    }

    // ── Receive path ─────────────────────────────────────────────────────────

    fn spawn_stream_task(
        &self,
        peer_device_id: String,
        generation: u64,
        mut stream: mpsc::Receiver<StreamItem>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    StreamItem::Event(event) => {
                        match manager
                            .handle_stream_event(&peer_device_id, generation, event)
                            .await
                        {
                            Ok(true) => {}
                            Ok(false) => return,
                            Err(err) => {
                                tracing::error!(
                                    target: "commands_agent",
                                    event = "session_receive_failed",
                                    peer_device_id = %peer_device_id,
                                    error = %err,
                                );
                                manager
                                    .teardown(
                                        &peer_device_id,
                                        Some(generation),
                                        Terminal::Error(err.to_ui()),
                                    )
                                    .await;
                                return;
                            }
                        }
                    }
                    StreamItem::Fatal(gateway_err) => {
                        let err = SessionError::from(gateway_err);
                        tracing::warn!(
                            target: "commands_agent",
                            event = "session_stream_terminal",
                            peer_device_id = %peer_device_id,
                            error = %err,
                        );
                        manager
                            .teardown(
                                &peer_device_id,
                                Some(generation),
                                Terminal::Error(err.to_ui()),
                            )
                            .await;
                        return;
                    }
                }
            }
        });
    }

    /// Returns Ok(false) when the stream task should stop (session gone or
    /// ended); an Err is fatal for the session.
    async fn handle_stream_event(
        &self,
        peer_device_id: &str,
        generation: u64,
        event: SseEvent,
    ) -> Result<bool, SessionError> {
        match event.event.as_str() {
            "session.message" => {}
            "session.ended" => {
                self.teardown(peer_device_id, Some(generation), Terminal::Ended)
                    .await;
                return Ok(false);
            }
            "session.error" => {
                let reason = serde_json::from_str::<serde_json::Value>(&event.data)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                    .unwrap_or_else(|| "relay reported a session error".into());
                self.teardown(
                    peer_device_id,
                    Some(generation),
                    Terminal::Error(UiError::new("relay_session_error", reason, true)),
                )
                .await;
                return Ok(false);
            }
            // Unknown event types are tolerated.
            _ => return Ok(true),
        }

        let envelope: SessionMessageEnvelope =
            serde_json::from_str(&event.data).map_err(ProtoError::from)?;

        let action = {
            let mut sessions = self.inner.sessions.lock().await;
            let slot = match sessions.get_mut(peer_device_id) {
                Some(slot) if slot.generation == generation => slot,
                _ => return Ok(false),
            };
            if slot.session.status != SessionStatus::Ready {
                return Ok(true);
            }
            if envelope.session_id != slot.session.session_id {
                return Err(ProtoError::SequenceViolation(
                    "envelope session id does not match".into(),
                )
                .into());
            }
            if envelope.frame.direction != Direction::AgentToClient {
                return Err(ProtoError::SequenceViolation(format!(
                    "inbound frame with direction {}",
                    envelope.frame.direction
                ))
                .into());
            }
            if envelope.frame.seq != slot.session.next_in_seq {
                return Err(ProtoError::SequenceViolation(format!(
                    "expected seq {}, got {}",
                    slot.session.next_in_seq, envelope.frame.seq
                ))
                .into());
            }
            let keys = slot.session.keys.as_ref().ok_or(SessionError::NotReady)?;
            let plaintext = open_frame(
                &keys.k_a2c,
                &envelope.session_id,
                &envelope.message_id,
                &envelope.frame,
            )?;
            slot.session.next_in_seq += 1;
            slot.session.last_activity = Utc::now();

            let session_id = slot.session.session_id.clone();
            match classify_payload_bytes(&plaintext) {
                AgentPayload::Progress { status, .. } => InboundAction::Emit(SessionEvent::Progress {
                    session_id,
                    status,
                }),
                AgentPayload::AgentError { error, .. } => {
                    InboundAction::Emit(SessionEvent::AgentError { session_id, error })
                }
                AgentPayload::Result {
                    result,
                    message_id,
                    model,
                    turns,
                    cost_usd,
                    ..
                } => InboundAction::Emit(SessionEvent::MessageReceived {
                    session_id,
                    message_id,
                    text: result,
                    model,
                    turns,
                    cost_usd,
                }),
                AgentPayload::SessionEnded { .. } => InboundAction::PeerEnded,
                AgentPayload::SessionError { error, .. } => InboundAction::PeerError(error),
                // Tolerated but surfaced as opaque text.
                AgentPayload::Unknown(value) => InboundAction::Emit(SessionEvent::MessageReceived {
                    session_id,
                    message_id: Some(envelope.message_id.clone()),
                    text: value.to_string(),
                    model: None,
                    turns: None,
                    cost_usd: None,
                }),
            }
        };

        match action {
            InboundAction::Emit(event) => {
                self.emit(event).await;
                Ok(true)
            }
            InboundAction::PeerEnded => {
                self.teardown(peer_device_id, Some(generation), Terminal::Ended)
                    .await;
                Ok(false)
            }
            InboundAction::PeerError(error) => {
                self.teardown(
                    peer_device_id,
                    Some(generation),
                    Terminal::Error(UiError::new("agent_session_error", error, true)),
                )
                .await;
                Ok(false)
            }
        }
    }

    // ── Terminal cleanup ─────────────────────────────────────────────────────

    /// The single cleanup site for every exit from `ready` (and failed
    /// handshakes). Removing the slot inside one critical section makes the
    /// cleanup idempotent: a second caller finds nothing and does nothing,
    /// so at most one terminal event is emitted.
    async fn teardown(
        &self,
        peer_device_id: &str,
        expected_generation: Option<u64>,
        terminal: Terminal,
    ) {
        let removed = {
            let mut sessions = self.inner.sessions.lock().await;
            match sessions.get(peer_device_id) {
                Some(slot)
                    if expected_generation.is_none()
                        || expected_generation == Some(slot.generation) =>
                {
                    sessions.remove(peer_device_id)
                }
                _ => None,
            }
        };
        let Some(mut slot) = removed else {
            return;
        };

        slot.sse_cancel.cancel();
        slot.handshake_cancel.cancel();
        if let Some(mut keys) = slot.session.keys.take() {
            keys.zeroize();
        }
        if let Some(cid) = slot.session.conversation_id.take() {
            self.inner
                .resume_hints
                .lock()
                .await
                .insert(peer_device_id.to_string(), cid);
        }

        let session_id = slot.session.session_id.clone();
        tracing::info!(
            target: "commands_agent",
            event = "session_teardown",
            session_id = %session_id,
            peer_device_id = %peer_device_id,
        );

        match terminal {
            Terminal::Ended => {
                self.emit(SessionEvent::Ended {
                    session_id,
                    peer_device_id: peer_device_id.to_string(),
                })
                .await;
            }
            Terminal::Error(error) => {
                self.emit(SessionEvent::Error {
                    session_id,
                    peer_device_id: peer_device_id.to_string(),
                    error,
                })
                .await;
            }
            Terminal::Silent => {}
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // The UI owns the receiver; if it is gone there is nobody to tell.
        let _ = self.inner.events.send(event).await;
    }
}
