//! Pluggable decryption of fetched asset bytes.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;

use crate::config::CipherConfig;
use crate::error::Error;

/// Turns ciphertext into plaintext. Must be deterministic for a given input
/// and key material.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

impl<F> Decryptor for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync,
{
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self(ciphertext)
    }
}

/// For libraries stored in the clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Decryptor for Identity {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(ciphertext.to_vec())
    }
}

pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM over `nonce || ciphertext || tag`.
#[derive(Clone)]
pub struct Aes256GcmDecryptor {
    cipher: Aes256Gcm,
}

impl fmt::Debug for Aes256GcmDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aes256GcmDecryptor").finish_non_exhaustive()
    }
}

impl Aes256GcmDecryptor {
    /// # Errors
    /// Returns [`Error::Decryption`] unless `key` is exactly 32 bytes.
    pub fn from_key(key: &[u8]) -> Result<Self, Error> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::Decryption(format!("expected a 32-byte key, got {}", key.len())))?;
        Ok(Self { cipher })
    }

    pub fn from_base64(key: &str) -> Result<Self, Error> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| Error::Decryption(format!("key is not valid base64: {e}")))?;
        Self::from_key(&raw)
    }

    /// Seal `plaintext` in the layout [`Decryptor::decrypt`] expects.
    pub fn encrypt(&self, nonce: [u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Decryption("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl Decryptor for Aes256GcmDecryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Decryption(format!(
                "ciphertext too short ({} bytes)",
                ciphertext.len()
            )));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| Error::Decryption("authentication failed (wrong key or corrupt data)".into()))
    }
}

/// Build the decryptor named by the configuration.
pub fn from_config(cfg: &CipherConfig) -> Result<Arc<dyn Decryptor>, Error> {
    Ok(match cfg {
        CipherConfig::None => Arc::new(Identity),
        CipherConfig::Aes256Gcm { key } => Arc::new(Aes256GcmDecryptor::from_base64(key)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7; 32];

    #[test]
    fn opens_what_it_seals() {
        let aes = Aes256GcmDecryptor::from_key(&KEY).unwrap();
        let sealed = aes.encrypt([1; NONCE_LEN], b"page one").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"page one");
        assert_eq!(aes.decrypt(&sealed).unwrap(), b"page one");
    }

    #[test]
    fn tampered_or_foreign_ciphertext_fails() {
        let aes = Aes256GcmDecryptor::from_key(&KEY).unwrap();
        let mut sealed = aes.encrypt([2; NONCE_LEN], b"page two").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(aes.decrypt(&sealed), Err(Error::Decryption(_))));

        let other = Aes256GcmDecryptor::from_key(&[9; 32]).unwrap();
        let sealed = aes.encrypt([2; NONCE_LEN], b"page two").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(Error::Decryption(_))));

        assert!(matches!(aes.decrypt(b"short"), Err(Error::Decryption(_))));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(Aes256GcmDecryptor::from_key(&[0; 16]).is_err());
        assert!(Aes256GcmDecryptor::from_base64("not base64!").is_err());
        let encoded = base64::engine::general_purpose::STANDARD.encode(KEY);
        assert!(Aes256GcmDecryptor::from_base64(&encoded).is_ok());
    }

    #[test]
    fn closures_are_decryptors() {
        let reverse = |bytes: &[u8]| -> Result<Vec<u8>, Error> {
            Ok(bytes.iter().rev().copied().collect())
        };
        assert_eq!(reverse.decrypt(b"abc").unwrap(), b"cba");
        assert_eq!(Identity.decrypt(b"abc").unwrap(), b"abc");
    }
}
