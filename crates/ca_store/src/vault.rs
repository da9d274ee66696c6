//! Credential vault: at-rest protection for the long-lived secrets.
//!
//! The OS keychain holds a random 32-byte wrapping key; the three secrets
//! (`access_token`, `refresh_token`, `identity_private_key`) are sealed
//! with AES-256-GCM into `credentials.enc` (0600) and replaced in
//! `config.json` by a sentinel. The locally-spawned agent reads its config
//! in plaintext, so every agent start is bracketed: restore before spawn,
//! re-secure on exit (normal or crash).
//!
//! Degraded mode: when the keychain is unavailable the config simply stays
//! plaintext with a logged notice — but a config that is already secured
//! is NEVER silently downgraded; restoring without the keychain fails.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use ca_crypto::aead;
use ca_crypto::CryptoError;

use crate::config::AgentConfig;
use crate::error::StoreError;
use crate::fsutil::write_atomic_secret;

pub const SECURED_SENTINEL: &str = "__SECURED__";

const KEYCHAIN_SERVICE: &str = "CommandsAgent";
const WRAP_KEY_ENTRY: &str = "credential-wrap-key";
const BUNDLE_AAD: &[u8] = b"commands-agent/credentials/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureOutcome {
    Secured,
    AlreadySecured,
    NothingToSecure,
    /// Keychain unavailable; plaintext left in place with a notice.
    Degraded,
}

/// Source of the keychain-held wrapping key.
pub trait WrapKeyStore: Send + Sync {
    fn get_or_create(&self) -> Result<[u8; 32], StoreError>;
}

pub struct KeychainWrapKeyStore;

impl WrapKeyStore for KeychainWrapKeyStore {
    fn get_or_create(&self) -> Result<[u8; 32], StoreError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, WRAP_KEY_ENTRY)
            .map_err(|e| StoreError::KeychainUnavailable(e.to_string()))?;
        match entry.get_password() {
            Ok(encoded) => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| StoreError::KeychainUnavailable(format!("corrupt wrap key: {e}")))?;
                bytes.try_into().map_err(|_| {
                    StoreError::KeychainUnavailable("wrap key has wrong length".into())
                })
            }
            Err(keyring::Error::NoEntry) => {
                use rand::RngCore;
                let mut key = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                entry
                    .set_password(&STANDARD.encode(key))
                    .map_err(|e| StoreError::KeychainUnavailable(e.to_string()))?;
                Ok(key)
            }
            Err(e) => Err(StoreError::KeychainUnavailable(e.to_string())),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialBundle {
    access_token: Option<String>,
    refresh_token: Option<String>,
    identity_private_key: Option<String>,
}

pub struct CredentialVault {
    config_path: PathBuf,
    credentials_path: PathBuf,
    keys: Box<dyn WrapKeyStore>,
    degraded_notice: AtomicBool,
}

fn is_sentinel(field: &Option<String>) -> bool {
    field.as_deref() == Some(SECURED_SENTINEL)
}

fn is_plaintext(field: &Option<String>) -> bool {
    field.is_some() && !is_sentinel(field)
}

impl CredentialVault {
    pub fn new(
        config_path: impl Into<PathBuf>,
        credentials_path: impl Into<PathBuf>,
        keys: Box<dyn WrapKeyStore>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            credentials_path: credentials_path.into(),
            keys,
            degraded_notice: AtomicBool::new(false),
        }
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(
            crate::paths::config_path()?,
            crate::paths::credentials_path()?,
            Box::new(KeychainWrapKeyStore),
        ))
    }

    /// Replace plaintext secrets in the config with the sentinel, sealing
    /// them into the ciphertext bundle. Idempotent.
    pub fn secure(&self) -> Result<SecureOutcome, StoreError> {
        let mut config = AgentConfig::load(&self.config_path)?;
        let fields = [
            &config.access_token,
            &config.refresh_token,
            &config.identity_private_key,
        ];
        let any_plaintext = fields.iter().any(|f| is_plaintext(f));
        let any_sentinel = fields.iter().any(|f| is_sentinel(f));
        if !any_plaintext {
            return Ok(if any_sentinel {
                SecureOutcome::AlreadySecured
            } else {
                SecureOutcome::NothingToSecure
            });
        }

        let wrap_key = match self.keys.get_or_create() {
            Ok(key) => key,
            Err(e) => {
                if !self.degraded_notice.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        target: "commands_agent",
                        event = "credential_vault_degraded",
                        error = %e,
                    );
                }
                return Ok(SecureOutcome::Degraded);
            }
        };

        // Fields already sentinel'd keep their previously sealed values.
        let previous = self.read_bundle(&wrap_key).unwrap_or_default();
        let bundle = CredentialBundle {
            access_token: take_secret(&mut config.access_token, previous.access_token),
            refresh_token: take_secret(&mut config.refresh_token, previous.refresh_token),
            identity_private_key: take_secret(
                &mut config.identity_private_key,
                previous.identity_private_key,
            ),
        };
        self.write_bundle(&wrap_key, &bundle)?;
        config.save(&self.config_path)?;

        tracing::info!(
            target: "commands_agent",
            event = "credentials_secured",
        );
        Ok(SecureOutcome::Secured)
    }

    /// Restore the sealed secrets into the config (before an agent start).
    /// Fails rather than downgrade when the keychain is unavailable.
    pub fn restore(&self) -> Result<(), StoreError> {
        let mut config = AgentConfig::load(&self.config_path)?;
        let any_sentinel = is_sentinel(&config.access_token)
            || is_sentinel(&config.refresh_token)
            || is_sentinel(&config.identity_private_key);
        if !any_sentinel {
            return Ok(());
        }

        let wrap_key = self
            .keys
            .get_or_create()
            .map_err(|_| StoreError::SecuredWithoutKeychain)?;
        let bundle = self.read_bundle(&wrap_key)?;

        if is_sentinel(&config.access_token) {
            config.access_token = bundle.access_token;
        }
        if is_sentinel(&config.refresh_token) {
            config.refresh_token = bundle.refresh_token;
        }
        if is_sentinel(&config.identity_private_key) {
            config.identity_private_key = bundle.identity_private_key;
        }
        config.save(&self.config_path)?;

        tracing::info!(
            target: "commands_agent",
            event = "credentials_restored",
        );
        Ok(())
    }

    fn write_bundle(
        &self,
        wrap_key: &[u8; 32],
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(bundle)?);

        use rand::RngCore;
        let mut nonce = [0u8; aead::NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let (ciphertext, tag) = aead::seal(wrap_key, &nonce, BUNDLE_AAD, &plaintext)?;
        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len() + tag.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        write_atomic_secret(&self.credentials_path, &out)
    }

    fn read_bundle(&self, wrap_key: &[u8; 32]) -> Result<CredentialBundle, StoreError> {
        let bytes = std::fs::read(&self.credentials_path)?;
        if bytes.len() < aead::NONCE_LEN + aead::TAG_LEN {
            return Err(CryptoError::Format("credential bundle too short".into()).into());
        }
        let (nonce, rest) = bytes.split_at(aead::NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - aead::TAG_LEN);
        let nonce: [u8; aead::NONCE_LEN] = nonce.try_into().expect("split length");
        let tag: [u8; aead::TAG_LEN] = tag.try_into().expect("split length");
        let plaintext = aead::open(wrap_key, &nonce, BUNDLE_AAD, ciphertext, &tag)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn take_secret(field: &mut Option<String>, sealed: Option<String>) -> Option<String> {
    if is_plaintext(field) {
        field.replace(SECURED_SENTINEL.to_string())
    } else {
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemoryKeys(Mutex<Option<[u8; 32]>>);

    impl MemoryKeys {
        fn new() -> Self {
            Self(Mutex::new(None))
        }
    }

    impl WrapKeyStore for MemoryKeys {
        fn get_or_create(&self) -> Result<[u8; 32], StoreError> {
            let mut slot = self.0.lock().unwrap();
            Ok(*slot.get_or_insert_with(|| {
                use rand::RngCore;
                let mut key = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            }))
        }
    }

    struct NoKeychain;

    impl WrapKeyStore for NoKeychain {
        fn get_or_create(&self) -> Result<[u8; 32], StoreError> {
            Err(StoreError::KeychainUnavailable("no backend".into()))
        }
    }

    fn vault_in(dir: &std::path::Path, keys: Box<dyn WrapKeyStore>) -> CredentialVault {
        CredentialVault::new(dir.join("config.json"), dir.join("credentials.enc"), keys)
    }

    fn seeded_config(dir: &std::path::Path) {
        let config = AgentConfig {
            access_token: Some("access-secret".into()),
            refresh_token: Some("refresh-secret".into()),
            identity_private_key: Some("seed-b64".into()),
            ..Default::default()
        };
        config.save(&dir.join("config.json")).unwrap();
    }

    #[test]
    fn secure_then_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let vault = vault_in(dir.path(), Box::new(MemoryKeys::new()));

        assert_eq!(vault.secure().unwrap(), SecureOutcome::Secured);

        let on_disk = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(!on_disk.contains("access-secret"));
        assert!(!on_disk.contains("refresh-secret"));
        assert!(on_disk.contains(SECURED_SENTINEL));
        assert!(dir.path().join("credentials.enc").exists());

        vault.restore().unwrap();
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.access_token.as_deref(), Some("access-secret"));
        assert_eq!(config.refresh_token.as_deref(), Some("refresh-secret"));
        assert_eq!(config.identity_private_key.as_deref(), Some("seed-b64"));
    }

    #[test]
    fn secure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let vault = vault_in(dir.path(), Box::new(MemoryKeys::new()));
        assert_eq!(vault.secure().unwrap(), SecureOutcome::Secured);
        assert_eq!(vault.secure().unwrap(), SecureOutcome::AlreadySecured);
    }

    #[test]
    fn empty_config_has_nothing_to_secure() {
        let dir = tempfile::tempdir().unwrap();
        AgentConfig::default()
            .save(&dir.path().join("config.json"))
            .unwrap();
        let vault = vault_in(dir.path(), Box::new(MemoryKeys::new()));
        assert_eq!(vault.secure().unwrap(), SecureOutcome::NothingToSecure);
    }

    #[test]
    fn keychain_unavailable_degrades_without_touching_config() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let vault = vault_in(dir.path(), Box::new(NoKeychain));
        assert_eq!(vault.secure().unwrap(), SecureOutcome::Degraded);
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.access_token.as_deref(), Some("access-secret"));
    }

    #[test]
    fn secured_config_is_never_downgraded_without_keychain() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let keys = Box::new(MemoryKeys::new());
        let vault = vault_in(dir.path(), keys);
        vault.secure().unwrap();

        let broken = vault_in(dir.path(), Box::new(NoKeychain));
        assert!(matches!(
            broken.restore(),
            Err(StoreError::SecuredWithoutKeychain)
        ));
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert!(is_sentinel(&config.access_token));
    }

    #[test]
    fn resecure_after_partial_restore_keeps_sealed_values() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let vault = vault_in(dir.path(), Box::new(MemoryKeys::new()));
        vault.secure().unwrap();

        // Simulate the agent rewriting only the access token in plaintext.
        let mut config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        config.access_token = Some("rotated-access".into());
        config.save(&dir.path().join("config.json")).unwrap();

        assert_eq!(vault.secure().unwrap(), SecureOutcome::Secured);
        vault.restore().unwrap();
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.access_token.as_deref(), Some("rotated-access"));
        // The untouched sentinel fields kept their original sealed values.
        assert_eq!(config.refresh_token.as_deref(), Some("refresh-secret"));
    }

    #[test]
    fn tampered_bundle_fails_restore() {
        let dir = tempfile::tempdir().unwrap();
        seeded_config(dir.path());
        let vault = vault_in(dir.path(), Box::new(MemoryKeys::new()));
        vault.secure().unwrap();

        let path = dir.path().join("credentials.enc");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            vault.restore(),
            Err(StoreError::Crypto(CryptoError::DecryptFailure))
        ));
    }
}
