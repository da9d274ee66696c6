//! Authenticated frame codec.
//!
//! Nonce layout (12 bytes, deterministic — never random):
//!   bytes 0–3: direction prefix `c2a\0` or `a2c\0`
//!   bytes 4–11: sequence number, big-endian u64
//! Uniqueness comes from the state machine's monotonic per-direction
//! counter; the prefix keeps the two directions in disjoint nonce spaces
//! under keys that are already independent.
//!
//! AAD: `base64(session_id "|" message_id "|" seq "|" direction)` on the
//! wire; the decoded string bytes are bound into GCM authentication, so
//! tampering with any routing field fails verification.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use ca_crypto::aead::{self, NONCE_LEN, TAG_LEN};
use ca_crypto::constant_time_eq;

use crate::error::ProtoError;

/// The only AEAD this protocol speaks. Anything else fails closed.
pub const FRAME_ALG: &str = "aes-256-gcm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToAgent,
    AgentToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToAgent => "client_to_agent",
            Direction::AgentToClient => "agent_to_client",
        }
    }

    fn nonce_prefix(&self) -> [u8; 4] {
        match self {
            Direction::ClientToAgent => *b"c2a\0",
            Direction::AgentToClient => *b"a2c\0",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encrypted frame as carried inside a `session.message` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedFrame {
    pub alg: String,
    pub direction: Direction,
    pub seq: u64,
    /// 12-byte deterministic nonce, base64.
    pub nonce: String,
    pub ciphertext: String,
    /// 16-byte GCM tag, base64.
    pub tag: String,
    pub aad: String,
}

/// Deterministic nonce for `(direction, seq)`.
pub fn build_nonce(direction: Direction, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..4].copy_from_slice(&direction.nonce_prefix());
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

fn aad_string(session_id: &str, message_id: &str, seq: u64, direction: Direction) -> String {
    format!("{session_id}|{message_id}|{seq}|{direction}")
}

/// Build and encrypt a frame for the given routing coordinates.
pub fn seal_frame(
    key: &[u8; 32],
    direction: Direction,
    seq: u64,
    session_id: &str,
    message_id: &str,
    plaintext: &[u8],
) -> Result<EncryptedFrame, ProtoError> {
    if seq == 0 {
        return Err(ProtoError::SequenceViolation(
            "sequence numbers start at 1".into(),
        ));
    }
    let nonce = build_nonce(direction, seq);
    let aad = aad_string(session_id, message_id, seq, direction);
    let (ciphertext, tag) = aead::seal(key, &nonce, aad.as_bytes(), plaintext)?;
    Ok(EncryptedFrame {
        alg: FRAME_ALG.to_string(),
        direction,
        seq,
        nonce: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(ciphertext),
        tag: STANDARD.encode(tag),
        aad: STANDARD.encode(aad),
    })
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ProtoError> {
    STANDARD
        .decode(value)
        .map_err(|e| ProtoError::Format(format!("{field} is not valid base64: {e}")))
}

/// Validate and decrypt a received frame.
///
/// The caller (the session state machine) has already checked the frame's
/// `direction` and `seq` against session expectations; this function checks
/// internal consistency — alg pin, nonce recomputation in constant time,
/// AAD binding to the envelope's routing fields — and then decrypts.
pub fn open_frame(
    key: &[u8; 32],
    session_id: &str,
    message_id: &str,
    frame: &EncryptedFrame,
) -> Result<Zeroizing<Vec<u8>>, ProtoError> {
    if frame.alg != FRAME_ALG {
        return Err(ProtoError::Format(format!("unsupported alg {:?}", frame.alg)));
    }
    if frame.seq == 0 {
        return Err(ProtoError::SequenceViolation(
            "sequence numbers start at 1".into(),
        ));
    }

    let wire_nonce = decode_b64("nonce", &frame.nonce)?;
    if wire_nonce.len() != NONCE_LEN {
        return Err(ProtoError::Format(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            wire_nonce.len()
        )));
    }
    let expected_nonce = build_nonce(frame.direction, frame.seq);
    if !constant_time_eq(&wire_nonce, &expected_nonce) {
        return Err(ProtoError::SequenceViolation(
            "nonce does not match direction and sequence".into(),
        ));
    }

    let tag_bytes = decode_b64("tag", &frame.tag)?;
    let tag: [u8; TAG_LEN] = tag_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProtoError::Format(format!("tag must be {TAG_LEN} bytes, got {}", tag_bytes.len())))?;

    let ciphertext = decode_b64("ciphertext", &frame.ciphertext)?;

    let expected_aad = aad_string(session_id, message_id, frame.seq, frame.direction);
    let wire_aad = decode_b64("aad", &frame.aad)?;
    if !constant_time_eq(&wire_aad, expected_aad.as_bytes()) {
        return Err(ProtoError::Format("aad does not match envelope fields".into()));
    }

    let plaintext = aead::open(key, &expected_nonce, expected_aad.as_bytes(), &ciphertext, &tag)?;
    Ok(plaintext)
}
