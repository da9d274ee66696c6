//! Bounded stderr tail and exit diagnosis.
//!
//! The last 4 KiB of the agent's stderr are retained so a non-zero exit
//! can be mapped to a user-facing message instead of "process exited".

use std::collections::VecDeque;

pub const STDERR_TAIL_BYTES: usize = 4096;

/// Known fatal conditions recognisable from stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentFailure {
    /// The registered identity key conflicts with the signed-in account.
    IdentityConflict,
    NetworkUnreachable,
    AuthRevoked,
}

impl AgentFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentFailure::IdentityConflict => {
                "This device's identity key is registered to a different account. \
                 Rotate the identity or sign in with the owning account."
            }
            AgentFailure::NetworkUnreachable => {
                "The agent could not reach the gateway. Check your network connection."
            }
            AgentFailure::AuthRevoked => {
                "Access for this device was revoked. Sign in again to re-link it."
            }
        }
    }
}

const IDENTITY_CONFLICT_MARKERS: [&str; 2] = [
    "identity key already registered",
    "device identity conflict",
];
const NETWORK_MARKERS: [&str; 3] = ["network unreachable", "ENETUNREACH", "getaddrinfo"];
const AUTH_MARKERS: [&str; 2] = ["invalid_grant", "authorization revoked"];

pub struct StderrTail {
    buf: VecDeque<u8>,
    cap: usize,
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(STDERR_TAIL_BYTES)
    }
}

impl StderrTail {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == self.cap {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    pub fn contents(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Map the retained tail to a known fatal condition, if any.
    pub fn diagnose(&self) -> Option<AgentFailure> {
        let tail = self.contents();
        if IDENTITY_CONFLICT_MARKERS.iter().any(|m| tail.contains(m)) {
            return Some(AgentFailure::IdentityConflict);
        }
        if NETWORK_MARKERS.iter().any(|m| tail.contains(m)) {
            return Some(AgentFailure::NetworkUnreachable);
        }
        if AUTH_MARKERS.iter().any(|m| tail.contains(m)) {
            return Some(AgentFailure::AuthRevoked);
        }
        None
    }
}
