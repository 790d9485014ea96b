//! AES-256-GCM envelope for encrypted transfers.
//!
//! Layout: `salt (16) || nonce (12) || ciphertext || tag (16)`. The key is
//! HKDF-SHA256 over the key material with the envelope salt.

use std::fmt;
use std::path::Path;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result, StageError};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM tag length in bytes.
pub const TAG_LEN: usize = 16;

const HKDF_INFO: &[u8] = b"qrdrop/v2 aes-256-gcm";

/// Out-of-band key material for encrypted transfers.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// A shared passphrase
    Passphrase(String),
    /// Raw key bytes, e.g. read from a key file
    Raw(Vec<u8>),
}

impl KeyMaterial {
    /// Read raw key bytes from a file.
    ///
    /// The file contents are used verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is empty.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(Error::Crypto(format!(
                "key file {} is empty",
                path.display()
            )));
        }
        Ok(Self::Raw(bytes))
    }

    /// Input keying material for HKDF.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Passphrase(p) => p.as_bytes(),
            Self::Raw(bytes) => bytes,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("KeyMaterial::Passphrase(..)"),
            Self::Raw(bytes) => write!(f, "KeyMaterial::Raw({} bytes)", bytes.len()),
        }
    }
}

/// Derive the 32-byte AES key for an envelope salt.
#[must_use]
pub fn derive_key(material: &KeyMaterial, salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), material.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Encrypt a payload into a fresh envelope.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn seal(plaintext: &[u8], material: &KeyMaterial) -> Result<Vec<u8>> {
    let salt = super::random_bytes::<SALT_LEN>();
    let nonce = super::random_bytes::<NONCE_LEN>();
    let key = derive_key(material, &salt);

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| Error::Crypto(format!("bad key: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt and authenticate an envelope.
///
/// # Errors
///
/// Returns [`StageError::Decrypt`] when the envelope is truncated or
/// authentication fails.
pub fn open(envelope: &[u8], material: &KeyMaterial) -> std::result::Result<Vec<u8>, StageError> {
    if envelope.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(StageError::Decrypt(format!(
            "envelope is {} bytes, shorter than the {} byte minimum",
            envelope.len(),
            SALT_LEN + NONCE_LEN + TAG_LEN
        )));
    }

    let (salt, rest) = envelope.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let key = derive_key(material, salt);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| StageError::Decrypt(format!("bad key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StageError::Decrypt("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = KeyMaterial::Passphrase("correct horse".to_string());
        let sealed = seal(b"top secret", &key).unwrap();

        assert_eq!(sealed.len(), SALT_LEN + NONCE_LEN + 10 + TAG_LEN);
        assert_eq!(open(&sealed, &key).unwrap(), b"top secret");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(b"payload", &KeyMaterial::Passphrase("one".to_string())).unwrap();
        let err = open(&sealed, &KeyMaterial::Passphrase("two".to_string())).unwrap_err();
        assert!(matches!(err, StageError::Decrypt(_)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = KeyMaterial::Raw(vec![7u8; 32]);
        let mut sealed = seal(b"payload", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&sealed, &key).is_err());
    }

    #[test]
    fn test_truncated_envelope() {
        let key = KeyMaterial::Raw(vec![1, 2, 3]);
        let err = open(&[0u8; 20], &key).unwrap_err();
        assert!(err.to_string().contains("shorter"));
    }

    #[test]
    fn test_derive_key_depends_on_salt() {
        let key = KeyMaterial::Passphrase("pw".to_string());
        assert_eq!(derive_key(&key, b"salt-a"), derive_key(&key, b"salt-a"));
        assert_ne!(derive_key(&key, b"salt-a"), derive_key(&key, b"salt-b"));
    }

    #[test]
    fn test_key_material_debug_hides_secret() {
        let key = KeyMaterial::Passphrase("hunter2".to_string());
        assert!(!format!("{key:?}").contains("hunter2"));
    }

    #[test]
    fn test_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.bin");
        std::fs::write(&path, [9u8; 32]).unwrap();
        assert_eq!(KeyMaterial::from_file(&path).unwrap(), KeyMaterial::Raw(vec![9u8; 32]));

        std::fs::write(&path, []).unwrap();
        assert!(KeyMaterial::from_file(&path).is_err());
    }
}
