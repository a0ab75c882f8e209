//! Decryption of the stored client identifier (SSN-equivalent).
//!
//! Identifiers are sealed with AES-256-GCM under a server-side key and
//! stored as base64 of `nonce || ciphertext`. The plaintext only ever lives
//! in a [`Zeroizing`] buffer.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

const NONCE_SIZE: usize = 12;

pub struct IdentityCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for IdentityCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCipher").finish_non_exhaustive()
    }
}

impl IdentityCipher {
    /// Key is 32 bytes, base64 encoded in configuration.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_bytes = Zeroizing::new(
            BASE64.decode(key_b64.trim()).map_err(|err| {
                CoreError::Identity(format!("key is not valid base64: {err}"))
            })?,
        );
        if key_bytes.len() != 32 {
            return Err(CoreError::Identity(format!(
                "key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn decrypt(&self, sealed_b64: &str) -> Result<Zeroizing<String>> {
        let blob = BASE64.decode(sealed_b64.trim()).map_err(|err| {
            CoreError::Identity(format!("sealed value is not base64: {err}"))
        })?;
        if blob.len() <= NONCE_SIZE {
            return Err(CoreError::Identity(
                "sealed value too short to contain a nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = Zeroizing::new(
            self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
                CoreError::Identity(
                    "decryption failed (wrong key or corrupt value)"
                        .to_string(),
                )
            })?,
        );
        String::from_utf8(plaintext.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| {
                CoreError::Identity(
                    "decrypted identifier is not UTF-8".to_string(),
                )
            })
    }

    /// Seals a plaintext identifier. Used by the case-management side and by
    /// tests; the monitoring core itself only decrypts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| {
                CoreError::Identity("encryption failed".to_string())
            })?;
        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> IdentityCipher {
        // 32 zero bytes, base64.
        IdentityCipher::from_base64_key(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
        )
        .expect("test key")
    }

    #[test]
    fn seal_and_open_round_trip() {
        let c = cipher();
        let sealed = c.encrypt("123-45-6789").expect("encrypt");
        let opened = c.decrypt(&sealed).expect("decrypt");
        assert_eq!(opened.as_str(), "123-45-6789");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = cipher().encrypt("123-45-6789").expect("encrypt");
        let other = IdentityCipher::from_base64_key(
            "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=",
        )
        .expect("test key");
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn short_or_garbage_input_is_rejected() {
        let c = cipher();
        assert!(c.decrypt("AAAA").is_err());
        assert!(c.decrypt("not base64 at all!").is_err());
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(IdentityCipher::from_base64_key("c2hvcnQ=").is_err());
    }
}
