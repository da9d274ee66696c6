//! ca_proto — Wire types and codec for the Commands Agent session layer
//!
//! Everything on the wire is JSON; byte fields are base64 (standard
//! alphabet, padded). The relay is untrusted: it routes `session.message`
//! envelopes whose frame contents it cannot read or undetectably alter.
//!
//! # Modules
//! - `frame`     — authenticated frame build/validate, deterministic nonces, AAD
//! - `envelope`  — the `session.message` envelope (what the relay sees)
//! - `handshake` — handshake REST/JSON shapes
//! - `payload`   — decrypted payload types: outbound user message, inbound agent payload sum
//! - `device`    — `dev_` + 32-hex device identifiers
//! - `share`     — share-token charset and URL/deep-link normalization
//! - `error`     — unified error type

pub mod device;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod payload;
pub mod share;

pub use envelope::SessionMessageEnvelope;
pub use error::ProtoError;
pub use frame::{Direction, EncryptedFrame};
pub use payload::AgentPayload;
