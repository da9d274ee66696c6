//! Line-buffered demultiplexer for the agent's stdout.
//!
//! Any line starting with `__DESKTOP_EVENT__:` carries a JSON conversation
//! event; everything else is a plain log line. The buffer holds at most
//! 1 MiB of an unterminated line — on overflow the OLDEST buffered bytes
//! are dropped so a runaway line cannot pin memory, and the eventual line
//! is surfaced (truncated) rather than lost.

use serde_json::Value;

pub const DESKTOP_EVENT_PREFIX: &str = "__DESKTOP_EVENT__:";
pub const MAX_LINE_BUFFER: usize = 1024 * 1024;

/// One item demultiplexed from the agent's stdout, attributed to the
/// profile that owns the process.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeEvent {
    /// Decrypted conversation traffic reported by the agent.
    ConversationEvent {
        profile_id: String,
        payload: Value,
    },
    /// Generic agent log output.
    Stdout {
        profile_id: String,
        line: String,
    },
}

pub struct LineDemux {
    profile_id: String,
    buf: Vec<u8>,
    truncated: bool,
}

impl LineDemux {
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            buf: Vec::new(),
            truncated: false,
        }
    }

    /// Feed raw stdout bytes; returns events for every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if let Some(event) = self.take_line() {
                    events.push(event);
                }
                continue;
            }
            if self.buf.len() >= MAX_LINE_BUFFER {
                // Truncate-oldest: keep the newest bytes of the line.
                let excess = self.buf.len() + 1 - MAX_LINE_BUFFER;
                self.buf.drain(..excess);
                self.truncated = true;
            }
            self.buf.push(b);
        }
        events
    }

    /// Flush a final unterminated line at process exit.
    pub fn finish(&mut self) -> Option<BridgeEvent> {
        if self.buf.is_empty() {
            None
        } else {
            self.take_line()
        }
    }

    fn take_line(&mut self) -> Option<BridgeEvent> {
        let raw = std::mem::take(&mut self.buf);
        let truncated = std::mem::take(&mut self.truncated);
        let mut line = String::from_utf8_lossy(&raw).into_owned();
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() {
            return None;
        }

        if let Some(json) = line.strip_prefix(DESKTOP_EVENT_PREFIX) {
            // A truncated event line lost its head — the JSON cannot be
            // trusted, surface it as a log line instead.
            if !truncated {
                match serde_json::from_str::<Value>(json) {
                    Ok(payload) => {
                        return Some(BridgeEvent::ConversationEvent {
                            profile_id: self.profile_id.clone(),
                            payload,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: "commands_agent",
                            event = "desktop_event_parse_failed",
                            profile_id = %self.profile_id,
                            error = %e,
                        );
                    }
                }
            }
        }
        Some(BridgeEvent::Stdout {
            profile_id: self.profile_id.clone(),
            line,
        })
    }
}
