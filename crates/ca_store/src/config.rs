//! `config.json` and `desktop-settings.json`.
//!
//! The config carries the three at-rest secrets (tokens + identity seed);
//! the credential vault replaces them with a sentinel while no local agent
//! is running. Desktop settings are plain preferences — never secret.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fsutil::write_atomic;

pub const DEFAULT_GATEWAY_URL: &str = "https://api.commands.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub gateway_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Secret; sentinel'd at rest while secured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Secret; sentinel'd at rest while secured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Secret Ed25519 identity seed, base64; sentinel'd at rest while secured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            device_id: None,
            owner_uid: None,
            email: None,
            access_token: None,
            refresh_token: None,
            identity_private_key: None,
            token_expires_at: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopSettings {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub last_profile_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DesktopSettings {
    fn default() -> Self {
        Self {
            theme: None,
            notifications_enabled: true,
            last_profile_id: None,
        }
    }
}

impl DesktopSettings {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.gateway_url, DEFAULT_GATEWAY_URL);
        assert!(cfg.access_token.is_none());
    }

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = AgentConfig {
            device_id: Some("dev_1".into()),
            access_token: Some("tok".into()),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let back = AgentConfig::load(&path).unwrap();
        assert_eq!(back.device_id.as_deref(), Some("dev_1"));
        assert_eq!(back.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn settings_defaults_are_forgiving() {
        let settings: DesktopSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.notifications_enabled);
    }
}
