//! Events the session layer emits toward the UI.

use serde::Serialize;

use crate::error::UiError;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session.ready")]
    Ready {
        session_id: String,
        peer_device_id: String,
        conversation_id: Option<String>,
        /// True when the agent bound a different conversation than the one
        /// we asked to resume — the UI discards the prior transcript.
        conversation_reset: bool,
    },

    /// A transparent reconnect is in flight for this peer. `session_id` is
    /// the expired session when one was known.
    #[serde(rename = "session.reconnecting")]
    Reconnecting {
        session_id: Option<String>,
        peer_device_id: String,
    },

    #[serde(rename = "message.sent")]
    MessageSent {
        session_id: String,
        message_id: String,
    },

    #[serde(rename = "message.received")]
    MessageReceived {
        session_id: String,
        message_id: Option<String>,
        text: String,
        model: Option<String>,
        turns: Option<u64>,
        cost_usd: Option<f64>,
    },

    #[serde(rename = "message.progress")]
    Progress {
        session_id: String,
        status: String,
    },

    /// The agent reported an error for one turn; the session stays ready.
    #[serde(rename = "agent.error")]
    AgentError {
        session_id: String,
        error: String,
    },

    #[serde(rename = "session.ended")]
    Ended {
        session_id: String,
        peer_device_id: String,
    },

    #[serde(rename = "session.error")]
    Error {
        session_id: String,
        peer_device_id: String,
        error: UiError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_with_dotted_type_tags() {
        let ev = SessionEvent::Ready {
            session_id: "s".into(),
            peer_device_id: "d".into(),
            conversation_id: None,
            conversation_reset: false,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "session.ready");

        let ev = SessionEvent::MessageSent { session_id: "s".into(), message_id: "m".into() };
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "message.sent");
    }
}
