//! AES-256-GCM seal/open with detached 16-byte tag.
//!
//! Key: 32 bytes. Nonce: 12 bytes (deterministic, built by the frame codec
//! from direction + sequence number — never random). Tag: 16 bytes, carried
//! as a separate wire field.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` under `key`/`nonce`, binding `aad`.
/// Returns (ciphertext, detached 16-byte tag).
pub fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let mut combined = cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    // aes-gcm appends the tag; split it off into the detached wire field.
    let split = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[split..]);
    combined.truncate(split);
    Ok((combined, tag))
}

/// Decrypt `ciphertext` + detached `tag` under `key`/`nonce`, verifying `aad`.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptFailure)?;
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: &combined, aad })
        .map_err(|_| CryptoError::DecryptFailure)?;
    Ok(Zeroizing::new(plaintext))
}
