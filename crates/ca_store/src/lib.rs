//! ca_store — persisted state for the Commands Agent desktop
//!
//! Everything under `~/.commands-agent/` is flat JSON written with
//! temp-file + rename; the credential vault additionally protects the
//! long-lived secrets (tokens + identity seed) with an OS-keychain-held
//! wrapping key and a 0600 ciphertext bundle.
//!
//! # Modules
//! - `vault`    — keychain-backed secure/restore cycle around agent starts
//! - `profile`  — profile CRUD with a sanitized write path
//! - `config`   — `config.json` and `desktop-settings.json`
//! - `auth`     — sign-in state; secrets never reach the UI view
//! - `paths`    — canonical locations under the home directory
//! - `fsutil`   — atomic writes
//! - `error`    — unified error type

pub mod auth;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod paths;
pub mod profile;
pub mod vault;

pub use error::StoreError;
pub use profile::{Profile, ProfileStore};
pub use vault::CredentialVault;
