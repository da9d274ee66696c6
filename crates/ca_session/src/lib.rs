//! ca_session — per-peer E2EE session lifecycle
//!
//! The state machine is the fate-of-session authority: it runs the
//! four-round handshake through the relay, owns the directional sequence
//! counters, serializes sends per peer, validates every inbound frame in
//! strict order, and guarantees terminal cleanup (cancel both tokens,
//! zeroize keys, drop the registry entry) runs exactly once no matter
//! which failure site fires first.
//!
//! # Modules
//! - `machine`   — `SessionManager`: registry, send/receive paths, reconnect
//! - `handshake` — the four-round handshake engine
//! - `limiter`   — per-peer sliding-window rate limiter
//! - `share`     — share-token staging and consume-on-sign-in
//! - `events`    — the UI event stream
//! - `error`     — session errors + the `{code, message, recoverable}` contract

pub mod error;
pub mod events;
pub mod handshake;
pub mod limiter;
pub mod machine;
pub mod share;

pub use error::{SessionError, UiError};
pub use events::SessionEvent;
pub use machine::{SessionManager, SessionStatus};
