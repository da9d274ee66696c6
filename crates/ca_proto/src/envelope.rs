//! The `session.message` envelope — what the relay sees.
//!
//! The relay is a DUMB RELAY: it routes on `session_id` and sees only the
//! base64 frame fields. It cannot read the plaintext and cannot alter any
//! field without failing GCM authentication on the receiving side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::EncryptedFrame;

pub const SESSION_MESSAGE_TYPE: &str = "session.message";

/// On-wire envelope for one encrypted frame, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessageEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    /// Random UUID per message; dedup key and AAD component.
    pub message_id: String,
    pub handshake_id: String,
    pub encrypted: bool,
    #[serde(flatten)]
    pub frame: EncryptedFrame,
}

impl SessionMessageEnvelope {
    pub fn new(
        session_id: &str,
        handshake_id: &str,
        message_id: &str,
        frame: EncryptedFrame,
    ) -> Self {
        Self {
            kind: SESSION_MESSAGE_TYPE.to_string(),
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            handshake_id: handshake_id.to_string(),
            encrypted: true,
            frame,
        }
    }

    pub fn fresh_message_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{seal_frame, Direction};

    #[test]
    fn envelope_serialises_frame_fields_flat() {
        let frame = seal_frame(&[1u8; 32], Direction::ClientToAgent, 1, "sid", "mid", b"pt").unwrap();
        let env = SessionMessageEnvelope::new("sid", "hid", "mid", frame);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "session.message");
        assert_eq!(json["encrypted"], true);
        assert_eq!(json["alg"], "aes-256-gcm");
        assert_eq!(json["direction"], "client_to_agent");
        assert_eq!(json["seq"], 1);
        assert!(json["nonce"].is_string());
        assert!(json["tag"].is_string());
    }

    #[test]
    fn envelope_deserialises_from_wire_json() {
        let frame = seal_frame(&[1u8; 32], Direction::AgentToClient, 3, "sid", "mid", b"pt").unwrap();
        let json = serde_json::to_string(&SessionMessageEnvelope::new("sid", "hid", "mid", frame)).unwrap();
        let back: SessionMessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frame.seq, 3);
        assert_eq!(back.frame.direction, Direction::AgentToClient);
    }
}
