//! AES-CBC decryption of `encryptedFeatures` payloads.
//!
//! The wire form is `base64(iv) "." base64(ciphertext)` with PKCS7 padding.
//! The key is base64 too; 16 bytes selects AES-128 and 32 bytes AES-256.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::error::{DecryptError, RepositoryError};
use crate::FeatureDefinitions;

const IV_LEN: usize = 16;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Decrypt `payload` with the base64 `key` and return the plaintext.
///
/// # Errors
///
/// Returns [`DecryptError`] when the payload shape, the base64, the key
/// length or the padding is wrong, or the plaintext is not UTF-8.
pub fn decrypt(payload: &str, key: &str) -> Result<String, DecryptError> {
    let (iv, ciphertext) = payload
        .trim()
        .split_once('.')
        .ok_or(DecryptError::MalformedPayload)?;
    let key = STANDARD.decode(key.trim())?;
    let iv = STANDARD.decode(iv)?;
    let ciphertext = STANDARD.decode(ciphertext)?;

    if iv.len() != IV_LEN {
        return Err(DecryptError::InvalidIv(iv.len()));
    }

    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(&key, &iv)
            .map_err(|_| DecryptError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        32 => Aes256CbcDec::new_from_slices(&key, &iv)
            .map_err(|_| DecryptError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        other => return Err(DecryptError::InvalidKeyLength(other)),
    }
    .map_err(|_| DecryptError::Cipher)?;

    String::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)
}

/// Decrypt an `encryptedFeatures` blob and compile the result.
///
/// # Errors
///
/// Returns [`RepositoryError::Decrypt`] if decryption fails and
/// [`RepositoryError::Decode`] if the plaintext is not a features object.
pub fn decrypt_features(payload: &str, key: &str) -> Result<FeatureDefinitions, RepositoryError> {
    let json = decrypt(payload, key)?;
    Ok(FeatureDefinitions::from_json(&json)?)
}
