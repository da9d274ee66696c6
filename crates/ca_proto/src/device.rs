//! Device identifiers: `dev_` + exactly 32 lowercase hex.
//!
//! Globally unique, opaque, stable for the lifetime of a profile (survives
//! profile renames). Generated from 128 bits of OS randomness.

use crate::error::ProtoError;

pub const DEVICE_ID_PREFIX: &str = "dev_";
pub const DEVICE_ID_HEX_LEN: usize = 32;

/// Generate a fresh device id.
pub fn generate_device_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let mut id = String::with_capacity(DEVICE_ID_PREFIX.len() + DEVICE_ID_HEX_LEN);
    id.push_str(DEVICE_ID_PREFIX);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{b:02x}");
    }
    id
}

/// `^dev_[a-f0-9]{32}$`
pub fn is_valid_device_id(id: &str) -> bool {
    let Some(hex) = id.strip_prefix(DEVICE_ID_PREFIX) else {
        return false;
    };
    hex.len() == DEVICE_ID_HEX_LEN
        && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn validate_device_id(id: &str) -> Result<(), ProtoError> {
    if is_valid_device_id(id) {
        Ok(())
    } else {
        Err(ProtoError::InvalidDeviceId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_validate() {
        for _ in 0..32 {
            assert!(is_valid_device_id(&generate_device_id()));
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_device_id(), generate_device_id());
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(!is_valid_device_id(""));
        assert!(!is_valid_device_id("dev_"));
        assert!(!is_valid_device_id("dev_short"));
        // uppercase hex
        assert!(!is_valid_device_id(&format!("dev_{}", "A".repeat(32))));
        // non-hex
        assert!(!is_valid_device_id(&format!("dev_{}", "g".repeat(32))));
        // 33 chars
        assert!(!is_valid_device_id(&format!("dev_{}", "a".repeat(33))));
        // missing prefix
        assert!(!is_valid_device_id(&"a".repeat(36)));
    }
}
