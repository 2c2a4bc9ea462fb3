//! Session record encryption — AES-256-CBC with PKCS7 padding.
//!
//! Every write draws a fresh random salt and IV; the record is stored as
//! `salt:iv:ciphertext` (base64 fields). A legacy two-part `iv:ciphertext`
//! format with a fixed salt remains readable for records written before
//! the salt rotation landed.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::{Digest, Sha256};

use perch_core::error::{PerchError, Result};

const BLOCK_SIZE: usize = 16;
const SALT_LEN: usize = 16;
/// Salt baked into records written by the legacy two-part format.
const LEGACY_SALT: &[u8] = b"perch-session-v1";

/// Symmetric cipher keyed from the process-wide session secret.
pub struct SessionCipher {
    secret: String,
}

impl SessionCipher {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    /// Encrypt a payload into `salt:iv:ciphertext` with fresh randomness.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; BLOCK_SIZE];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let key = derive_key(&self.secret, &salt);
        let ciphertext = cbc_encrypt(plaintext.as_bytes(), &key, &iv);

        format!(
            "{}:{}:{}",
            BASE64.encode(salt),
            BASE64.encode(iv),
            BASE64.encode(&ciphertext)
        )
    }

    /// Decrypt either format. Errors mean the record is corrupt or was
    /// written under a different secret — callers fall back to a fresh
    /// unauthenticated session.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let parts: Vec<&str> = blob.split(':').collect();
        let (salt, iv, ciphertext) = match parts.as_slice() {
            [salt, iv, ct] => (
                BASE64
                    .decode(salt)
                    .map_err(|e| PerchError::Crypto(format!("Bad salt: {e}")))?,
                BASE64
                    .decode(iv)
                    .map_err(|e| PerchError::Crypto(format!("Bad IV: {e}")))?,
                BASE64
                    .decode(ct)
                    .map_err(|e| PerchError::Crypto(format!("Bad ciphertext: {e}")))?,
            ),
            // Legacy two-part records carry no salt of their own.
            [iv, ct] => (
                LEGACY_SALT.to_vec(),
                BASE64
                    .decode(iv)
                    .map_err(|e| PerchError::Crypto(format!("Bad legacy IV: {e}")))?,
                BASE64
                    .decode(ct)
                    .map_err(|e| PerchError::Crypto(format!("Bad legacy ciphertext: {e}")))?,
            ),
            _ => {
                return Err(PerchError::Crypto(format!(
                    "Unrecognized record format ({} parts)",
                    parts.len()
                )));
            }
        };

        if iv.len() != BLOCK_SIZE {
            return Err(PerchError::Crypto("IV must be 16 bytes".into()));
        }
        let mut iv_arr = [0u8; BLOCK_SIZE];
        iv_arr.copy_from_slice(&iv);

        let key = derive_key(&self.secret, &salt);
        let plaintext = cbc_decrypt(&ciphertext, &key, &iv_arr)?;
        String::from_utf8(plaintext)
            .map_err(|e| PerchError::Crypto(format!("Decryption produced invalid UTF-8: {e}")))
    }

    /// Encrypt in the legacy `iv:ciphertext` format. Kept for migration
    /// tests only.
    #[doc(hidden)]
    pub fn encrypt_legacy(&self, plaintext: &str) -> String {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        let key = derive_key(&self.secret, LEGACY_SALT);
        let ciphertext = cbc_encrypt(plaintext.as_bytes(), &key, &iv);
        format!("{}:{}", BASE64.encode(iv), BASE64.encode(&ciphertext))
    }
}

/// Derive the AES-256 key from the secret and the record's salt.
fn derive_key(secret: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt);
    let result = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// AES-256-CBC encrypt with PKCS7 padding.
fn cbc_encrypt(data: &[u8], key: &[u8; 32], iv: &[u8; BLOCK_SIZE]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    // PKCS7 padding
    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    let mut encrypted = Vec::with_capacity(padded.len());
    let mut prev = *iv;
    for chunk in padded.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in chunk.iter().enumerate() {
            block[i] = b ^ prev[i];
        }
        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        encrypted.extend_from_slice(&ga);
    }

    encrypted
}

/// AES-256-CBC decrypt with PKCS7 unpadding. Errors on malformed input —
/// the signal the session manager uses to fall back to a fresh context.
fn cbc_decrypt(data: &[u8], key: &[u8; 32], iv: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(PerchError::Crypto(format!(
            "Ciphertext length {} is not a block multiple",
            data.len()
        )));
    }

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut decrypted = Vec::with_capacity(data.len());
    let mut prev = *iv;
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut ga = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut ga);
        for (i, b) in ga.iter().enumerate() {
            decrypted.push(b ^ prev[i]);
        }
        prev.copy_from_slice(chunk);
    }

    // Validate and strip PKCS7 padding
    let pad_len = *decrypted
        .last()
        .ok_or_else(|| PerchError::Crypto("Empty plaintext".into()))? as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > decrypted.len() {
        return Err(PerchError::Crypto("Invalid padding".into()));
    }
    let valid = decrypted[decrypted.len() - pad_len..]
        .iter()
        .all(|&b| b == pad_len as u8);
    if !valid {
        return Err(PerchError::Crypto("Invalid padding".into()));
    }
    decrypted.truncate(decrypted.len() - pad_len);
    Ok(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = SessionCipher::new("test-secret-12345");
        let payload = r#"{"cookies":[{"name":"auth_token","value":"deadbeef"}]}"#;

        let blob = cipher.encrypt(payload);
        assert_eq!(blob.split(':').count(), 3);
        assert!(!blob.contains("auth_token"));
        assert_eq!(cipher.decrypt(&blob).unwrap(), payload);
    }

    #[test]
    fn test_fresh_salt_and_iv_per_write() {
        let cipher = SessionCipher::new("test-secret");
        let a = cipher.encrypt("same payload");
        let b = cipher.encrypt("same payload");
        assert_ne!(a, b);
        // Both still decrypt to the same plaintext
        assert_eq!(cipher.decrypt(&a).unwrap(), "same payload");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same payload");
    }

    #[test]
    fn test_legacy_format_still_readable() {
        let cipher = SessionCipher::new("test-secret");
        let blob = cipher.encrypt_legacy("old session data");
        assert_eq!(blob.split(':').count(), 2);
        assert_eq!(cipher.decrypt(&blob).unwrap(), "old session data");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let cipher = SessionCipher::new("secret-a");
        let other = SessionCipher::new("secret-b");
        let blob = cipher.encrypt("payload");
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn test_garbage_blob_fails() {
        let cipher = SessionCipher::new("secret");
        assert!(cipher.decrypt("not a record").is_err());
        assert!(cipher.decrypt("a:b:c:d").is_err());
        assert!(cipher.decrypt("!!!:???").is_err());
    }

    #[test]
    fn test_unicode_payload() {
        let cipher = SessionCipher::new("secret");
        let payload = "cookies with émojis 🐦 and ünïcode";
        assert_eq!(cipher.decrypt(&cipher.encrypt(payload)).unwrap(), payload);
    }
}
