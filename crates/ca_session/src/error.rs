//! Session errors and the user-visible error contract.
//!
//! Component errors bubble up untranslated; `to_ui()` is the single place
//! that categorizes them into `{code, message, recoverable}` before
//! anything reaches the UI. `recoverable` drives retry affordances
//! ("reconnect now" vs. a sign-in prompt).

use serde::Serialize;
use thiserror::Error;

use ca_crypto::CryptoError;
use ca_gateway::GatewayError;
use ca_proto::ProtoError;

/// The only error shape that crosses to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiError {
    /// Stable machine string.
    pub code: String,
    /// Human string.
    pub message: String,
    pub recoverable: bool,
}

impl UiError {
    pub fn new(code: &str, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Handshake aborted: {0}")]
    HandshakeAborted(String),

    #[error("Agent identity signature invalid")]
    SignatureInvalid,

    #[error("A session with this device is already active")]
    DuplicateSession,

    #[error("Too many active sessions ({0})")]
    TooManySessions(usize),

    #[error("Rate limited")]
    RateLimited,

    #[error("No session with this device")]
    NoSession,

    #[error("Session is not ready")]
    NotReady,

    #[error("Agent ended the session")]
    PeerEnded,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SessionError {
    /// True when the failed operation did not consume a sequence number and
    /// the caller may simply retry.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SessionError::RateLimited)
    }

    pub fn to_ui(&self) -> UiError {
        match self {
            SessionError::HandshakeTimeout => UiError::new(
                "handshake_timeout",
                "The agent did not respond in time. Check that it is running, then retry.",
                true,
            ),
            SessionError::HandshakeAborted(reason) => {
                UiError::new("handshake_aborted", format!("Handshake aborted: {reason}"), true)
            }
            SessionError::SignatureInvalid
            | SessionError::Crypto(CryptoError::SignatureInvalid) => UiError::new(
                "signature_invalid",
                "Agent identity could not be verified — possible MITM. The session was closed.",
                false,
            ),
            SessionError::DuplicateSession => UiError::new(
                "duplicate_session",
                "A session with this device is already active.",
                false,
            ),
            SessionError::TooManySessions(n) => UiError::new(
                "too_many_sessions",
                format!("Too many active sessions ({n}). Close one and retry."),
                true,
            ),
            SessionError::RateLimited => UiError::new(
                "rate_limited",
                "Sending too fast — wait a moment and retry.",
                true,
            ),
            SessionError::NoSession => {
                UiError::new("no_session", "No session with this device.", true)
            }
            SessionError::NotReady => {
                UiError::new("session_not_ready", "The session is still connecting.", true)
            }
            SessionError::PeerEnded => {
                UiError::new("peer_ended", "The agent ended the session.", true)
            }
            SessionError::Crypto(CryptoError::DecryptFailure) => UiError::new(
                "decrypt_failure",
                "A message failed authentication. Reconnect to continue.",
                true,
            ),
            SessionError::Crypto(e) => {
                UiError::new("crypto_error", e.to_string(), false)
            }
            SessionError::Proto(ProtoError::SequenceViolation(reason)) => UiError::new(
                "sequence_violation",
                format!("Message ordering violated ({reason}). Reconnect to continue."),
                true,
            ),
            SessionError::Proto(ProtoError::PromptTooLong { max, .. }) => UiError::new(
                "prompt_too_long",
                format!("Message exceeds the {max}-character limit."),
                true,
            ),
            SessionError::Proto(e) => UiError::new("protocol_error", e.to_string(), true),
            SessionError::Gateway(GatewayError::Gone) => UiError::new(
                "session_expired",
                "Session expired — will reconnect on next message.",
                true,
            ),
            SessionError::Gateway(GatewayError::Unauthenticated)
            | SessionError::Gateway(GatewayError::TokenRefresh(_)) => UiError::new(
                "sign_in_required",
                "Your session with Commands.com has expired. Sign in again.",
                false,
            ),
            SessionError::Gateway(GatewayError::UntrustedOrigin(origin)) => UiError::new(
                "untrusted_origin",
                format!("Refusing to contact untrusted origin {origin}."),
                false,
            ),
            SessionError::Gateway(GatewayError::UnsafeScheme(s)) => {
                UiError::new("unsafe_scheme", format!("Refusing unsafe URL: {s}"), false)
            }
            SessionError::Gateway(GatewayError::SubscriptionFailed { attempts }) => UiError::new(
                "relay_unreachable",
                format!("Lost the relay connection after {attempts} attempts. Reconnect to continue."),
                true,
            ),
            SessionError::Gateway(e) => UiError::new("relay_error", e.to_string(), true),
        }
    }
}
