//! ca_agent — bridge to the locally-spawned agent process
//!
//! The desktop never holds session keys; the local agent process does the
//! protocol work and reports decrypted conversation traffic for owner-side
//! observability by printing `__DESKTOP_EVENT__:` lines on stdout. This
//! crate demultiplexes that stream, keeps a stderr tail for exit
//! diagnosis, and brackets every agent start with the credential vault's
//! restore → run → re-secure cycle.
//!
//! # Modules
//! - `bridge`  — line-buffered NDJSON demultiplexer
//! - `stderr`  — bounded stderr tail + fatal-string diagnosis
//! - `runtime` — agent process supervision and profile deletion
//! - `error`   — unified error type

pub mod bridge;
pub mod error;
pub mod runtime;
pub mod stderr;

pub use bridge::{BridgeEvent, LineDemux};
pub use error::BridgeError;
