//! Connector credential decryption
//!
//! Passwords are stored by the metadata platform as
//! `salt:iv:ciphertext:authTag`, every part base64 encoded. The key is
//! derived from the shared secret with scrypt (N=16384, r=8, p=1) and the
//! payload is sealed with AES-256-GCM using a 16 byte IV.

use crate::errors::CryptoError;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

const MIN_SECRET_LEN: usize = 32;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Turns a stored connector password into the plain value handed to a transport
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(&self, stored: &str) -> Result<String, CryptoError>;
}

/// Decryptor keyed by the platform's shared encryption secret
#[derive(Clone)]
pub struct SecretKeyDecryptor {
    secret: Zeroizing<String>,
}

impl std::fmt::Debug for SecretKeyDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyDecryptor").finish_non_exhaustive()
    }
}

impl SecretKeyDecryptor {
    pub fn new(secret: impl Into<String>) -> Result<Self, CryptoError> {
        let secret = Zeroizing::new(secret.into());
        if secret.len() < MIN_SECRET_LEN {
            return Err(CryptoError::WeakSecret);
        }
        Ok(Self { secret })
    }

    /// Seal a plain value in the stored password format
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::InvalidFormat(
                "cannot encrypt an empty value".to_string(),
            ));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = self.cipher(&salt)?;
        let mut sealed = cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok([
            STANDARD.encode(salt),
            STANDARD.encode(iv),
            STANDARD.encode(&sealed),
            STANDARD.encode(tag),
        ]
        .join(":"))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm16, CryptoError> {
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        scrypt::scrypt(self.secret.as_bytes(), salt, &params, key.as_mut_slice())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        Aes256Gcm16::new_from_slice(key.as_slice())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// True when a stored value has the four-part encrypted shape
pub fn is_encrypted(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 4 && parts.iter().all(|p| STANDARD.decode(p).is_ok())
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(part)
        .map_err(|e| CryptoError::InvalidFormat(format!("{} is not base64: {}", name, e)))
}

impl CredentialDecryptor for SecretKeyDecryptor {
    /// Values without the encrypted shape are returned as-is so that legacy
    /// plain text passwords keep working.
    fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        if !is_encrypted(stored) {
            return Ok(stored.to_string());
        }

        let parts: Vec<&str> = stored.split(':').collect();
        let salt = decode_part(parts[0], "salt")?;
        let iv = decode_part(parts[1], "iv")?;
        let mut sealed = decode_part(parts[2], "ciphertext")?;
        let tag = decode_part(parts[3], "auth tag")?;

        if iv.len() != IV_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "auth tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        sealed.extend_from_slice(&tag);
        let cipher = self.cipher(&salt)?;
        let plain = cipher
            .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
            .map_err(|_| {
                CryptoError::DecryptionFailed("authentication tag mismatch".to_string())
            })?;

        String::from_utf8(plain).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
