//! Decrypted payload types.
//!
//! Outbound: the user message the desktop encrypts into a frame.
//! Inbound: agent payloads are loosely typed on the wire — model them as a
//! closed sum over the known shapes and branch exhaustively; an `Unknown`
//! payload is surfaced as opaque text and must never crash the machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;

/// Hard cap on outbound plaintext, counted in characters.
pub const MAX_PROMPT_CHARS: usize = 100_000;

/// Plaintext of an outbound user message frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub session_id: String,
    pub message_id: String,
    pub prompt: String,
}

impl UserMessage {
    /// Serialize for encryption, enforcing the prompt cap.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let chars = self.prompt.chars().count();
        if chars > MAX_PROMPT_CHARS {
            return Err(ProtoError::PromptTooLong {
                max: MAX_PROMPT_CHARS,
                got: chars,
            });
        }
        Ok(serde_json::to_vec(self)?)
    }
}

/// Everything the agent side can put in a frame (or the relay in a
/// plaintext control event).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPayload {
    Progress {
        status: String,
        message_id: Option<String>,
    },
    AgentError {
        error: String,
        message_id: Option<String>,
    },
    Result {
        result: String,
        message_id: Option<String>,
        status: Option<String>,
        turns: Option<u64>,
        cost_usd: Option<f64>,
        model: Option<String>,
    },
    SessionEnded {
        session_id: Option<String>,
    },
    SessionError {
        session_id: Option<String>,
        error: String,
    },
    Unknown(Value),
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Classify a decrypted (or control-plane) JSON payload.
pub fn classify_payload(v: Value) -> AgentPayload {
    match v.get("type").and_then(Value::as_str) {
        Some("session.ended") => {
            return AgentPayload::SessionEnded {
                session_id: str_field(&v, "session_id"),
            }
        }
        Some("session.error") => {
            return AgentPayload::SessionError {
                session_id: str_field(&v, "session_id"),
                error: str_field(&v, "error").unwrap_or_else(|| "session error".into()),
            }
        }
        _ => {}
    }

    if v.get("status").and_then(Value::as_str) == Some("running") {
        return AgentPayload::Progress {
            status: "running".into(),
            message_id: str_field(&v, "message_id"),
        };
    }
    if let Some(error) = v.get("error") {
        let error = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return AgentPayload::AgentError {
            error,
            message_id: str_field(&v, "message_id"),
        };
    }
    if let Some(result) = v.get("result").and_then(Value::as_str) {
        return AgentPayload::Result {
            result: result.to_string(),
            message_id: str_field(&v, "message_id"),
            status: str_field(&v, "status"),
            turns: v.get("turns").and_then(Value::as_u64),
            cost_usd: v.get("cost_usd").and_then(Value::as_f64),
            model: str_field(&v, "model"),
        };
    }
    AgentPayload::Unknown(v)
}

/// Classify raw decrypted bytes; undecodable JSON is opaque, not an error.
pub fn classify_payload_bytes(bytes: &[u8]) -> AgentPayload {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(v) => classify_payload(v),
        Err(_) => AgentPayload::Unknown(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
    }
}
