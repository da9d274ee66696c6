//! ca_gateway — REST and SSE client for the untrusted relay
//!
//! Every authenticated request resolves against a static origin allowlist
//! before the bearer token is attached, redirects are never followed, and a
//! single 401 triggers exactly one token refresh + retry. The SSE side
//! resumes with `Last-Event-ID`, deduplicates a bounded window of event
//! ids, and backs off exponentially with jitter.
//!
//! # Modules
//! - `origin`  — trusted-origin and scheme policy
//! - `auth`    — token provider seam (access + forced refresh)
//! - `client`  — `GatewayClient`: typed REST calls and SSE subscriptions
//! - `sse`     — incremental Server-Sent-Events parser
//! - `backoff` — exponential backoff with jitter
//! - `relay`   — the `Relay` trait the session layer consumes
//! - `error`   — unified error type

pub mod auth;
pub mod backoff;
pub mod client;
pub mod error;
pub mod origin;
pub mod relay;
pub mod sse;

pub use auth::TokenProvider;
pub use client::GatewayClient;
pub use error::GatewayError;
pub use relay::{Relay, StreamItem};
pub use sse::SseEvent;
