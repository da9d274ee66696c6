//! Profile persistence with a sanitized write path.
//!
//! One directory per profile under `profiles/{profile_id}/` holding
//! `profile.json` plus optional `avatar.png` and `audit.log`. Profiles are
//! created by the UI but every write funnels through `validate()`, so a
//! malformed device id, a relative workspace path, or an audit path that
//! escapes the profile directory never reaches disk.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ca_proto::device::is_valid_device_id;

use crate::error::StoreError;
use crate::fsutil::write_atomic;

pub const MAX_DEVICE_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Cloud,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionProfile {
    #[serde(rename = "read-only")]
    ReadOnly,
    #[serde(rename = "dev-safe")]
    DevSafe,
    #[serde(rename = "full")]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// `profile_{unix_ts}_{8hex}`
    pub id: String,
    /// `dev_` + 32 lowercase hex; rename-stable, regenerated never.
    pub device_id: String,
    pub display_name: String,
    /// Slug ≤32 chars, disambiguated among sibling profiles.
    pub device_name: String,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub permission_profile: PermissionProfile,
    pub gateway_url: String,
    /// Must be absolute.
    pub workspace_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<serde_json::Value>,
    /// Must lie within the profile directory; None means the default
    /// `audit.log` next to `profile.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

pub fn new_profile_id(now: DateTime<Utc>) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("profile_{}_{}", now.timestamp(), hex_lower(&bytes))
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn is_valid_profile_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("profile_") else {
        return false;
    };
    let Some((ts, hex)) = rest.split_once('_') else {
        return false;
    };
    !ts.is_empty()
        && ts.bytes().all(|b| b.is_ascii_digit())
        && hex.len() == 8
        && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Lowercase, `[a-z0-9-]`, runs of anything else collapse to one `-`,
/// trimmed, capped at 32.
pub fn slugify_device_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= MAX_DEVICE_NAME_LEN {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug
    }
}

pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(crate::paths::profiles_dir()?))
    }

    pub fn profile_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn profile_json(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("profile.json")
    }

    /// Create a profile, slugging and disambiguating its device name among
    /// siblings (`name`, `name-2`, `name-3`, …).
    pub fn create(&self, mut profile: Profile) -> Result<Profile, StoreError> {
        let base = slugify_device_name(&profile.device_name);
        let siblings: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|p| p.id != profile.id)
            .map(|p| p.device_name)
            .collect();
        let mut candidate = base.clone();
        let mut n = 1usize;
        while siblings.iter().any(|s| s == &candidate) {
            n += 1;
            let suffix = format!("-{n}");
            let keep = MAX_DEVICE_NAME_LEN.saturating_sub(suffix.len());
            candidate = format!("{}{}", &base[..base.len().min(keep)], suffix);
        }
        profile.device_name = candidate;
        self.save(&profile)?;
        Ok(profile)
    }

    /// The sanitized write path: every persisted profile passes validation.
    pub fn save(&self, profile: &Profile) -> Result<(), StoreError> {
        self.validate(profile)?;
        let bytes = serde_json::to_vec_pretty(profile)?;
        write_atomic(&self.profile_json(&profile.id), &bytes)
    }

    pub fn load(&self, id: &str) -> Result<Profile, StoreError> {
        let path = self.profile_json(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn list(&self) -> Result<Vec<Profile>, StoreError> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Ok(out);
        };
        for entry in entries.flatten() {
            let id = entry.file_name().to_string_lossy().into_owned();
            if let Ok(profile) = self.load(&id) {
                out.push(profile);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Remove the profile directory. The caller is responsible for the
    /// best-effort device deregistration beforehand.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.profile_dir(id);
        if !dir.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    pub fn audit_log_path(&self, profile: &Profile) -> PathBuf {
        profile
            .audit_log_path
            .clone()
            .unwrap_or_else(|| self.profile_dir(&profile.id).join("audit.log"))
    }

    fn validate(&self, profile: &Profile) -> Result<(), StoreError> {
        if !is_valid_profile_id(&profile.id) {
            return Err(StoreError::InvalidProfile(format!(
                "bad profile id {:?}",
                profile.id
            )));
        }
        if !is_valid_device_id(&profile.device_id) {
            return Err(StoreError::InvalidProfile(format!(
                "bad device id {:?}",
                profile.device_id
            )));
        }
        if profile.display_name.trim().is_empty() {
            return Err(StoreError::InvalidProfile("empty display name".into()));
        }
        if profile.device_name.is_empty()
            || profile.device_name.len() > MAX_DEVICE_NAME_LEN
            || profile.device_name != slugify_device_name(&profile.device_name)
        {
            return Err(StoreError::InvalidProfile(format!(
                "device name {:?} is not a slug",
                profile.device_name
            )));
        }
        if !profile.workspace_path.is_absolute() {
            return Err(StoreError::InvalidProfile(
                "workspace path must be absolute".into(),
            ));
        }
        if let Some(audit) = &profile.audit_log_path {
            self.validate_audit_path(&profile.id, audit)?;
        }
        Ok(())
    }

    fn validate_audit_path(&self, id: &str, audit: &Path) -> Result<(), StoreError> {
        let dir = self.profile_dir(id);
        if !audit.starts_with(&dir) {
            return Err(StoreError::InvalidProfile(
                "audit log must lie within the profile directory".into(),
            ));
        }
        if audit
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StoreError::InvalidProfile(
                "audit log path must not contain ..".into(),
            ));
        }
        Ok(())
    }
}
