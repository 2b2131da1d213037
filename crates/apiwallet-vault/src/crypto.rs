//! AES-256-CBC encryption of JSON payloads.
//!
//! The [`Cipher`] holds one key and one IV, taken verbatim from the
//! persisted [`EncryptionConfig`](crate::keys::EncryptionConfig). Payloads
//! are serialized to JSON, PKCS7-padded, encrypted, and returned as
//! standard base64 text so they fit in the string-valued key-value store.
//!
//! # Security Notes
//!
//! - The IV is fixed per profile, so identical plaintexts produce identical
//!   ciphertexts. Stored values are whole collections rewritten on every
//!   change, which keeps this acceptable for the local threat model.
//! - CBC carries no authentication tag. Tampering is detected only because
//!   the damaged plaintext no longer unpads or parses as JSON.

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, VaultError};

/// Length of the AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the CBC initialization vector in bytes.
pub const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Symmetric cipher for vault payloads.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Cipher {
    /// Build a cipher from raw key material.
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Build a cipher from slices, checking their lengths.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if either slice has the
    /// wrong length.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| VaultError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        })?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| VaultError::EncryptionFailed {
            reason: format!("iv must be {} bytes, got {}", IV_LEN, iv.len()),
        })?;
        Ok(Self::new(key, iv))
    }

    /// Encrypt raw bytes, returning base64 ciphertext.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        tracing::trace!(
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "encrypted data"
        );

        BASE64.encode(ciphertext)
    }

    /// Decrypt base64 ciphertext produced by [`encrypt_bytes`](Self::encrypt_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedCiphertext`] if the text is not valid
    /// base64 or the decrypted block does not carry valid PKCS7 padding.
    pub fn decrypt_bytes(&self, ciphertext: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(ciphertext.trim())
            .map_err(|e| VaultError::MalformedCiphertext {
                reason: format!("invalid base64: {e}"),
            })?;

        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&raw)
            .map_err(|_| VaultError::MalformedCiphertext {
                reason: "bad padding, wrong key or corrupted data".into(),
            })?;

        tracing::trace!(
            ciphertext_len = raw.len(),
            plaintext_len = plaintext.len(),
            "decrypted data"
        );

        Ok(plaintext)
    }

    /// Serialize `payload` to JSON and encrypt it.
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String> {
        let json = serde_json::to_vec(payload)?;
        Ok(self.encrypt_bytes(&json))
    }

    /// Decrypt `ciphertext` into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedCiphertext`] if the ciphertext does
    /// not decode to valid JSON under this key.
    pub fn decrypt(&self, ciphertext: &str) -> Result<serde_json::Value> {
        let plaintext = self.decrypt_bytes(ciphertext)?;
        let text = String::from_utf8(plaintext).map_err(|_| VaultError::MalformedCiphertext {
            reason: "plaintext is not valid UTF-8".into(),
        })?;
        serde_json::from_str(&text).map_err(|e| VaultError::MalformedCiphertext {
            reason: format!("plaintext is not valid JSON: {e}"),
        })
    }

    /// Decrypt `ciphertext` and decode it as `T`.
    ///
    /// A payload that decrypts to valid JSON of the wrong shape fails with
    /// [`VaultError::Serialization`], not `MalformedCiphertext`.
    pub fn decrypt_as<T: DeserializeOwned>(&self, ciphertext: &str) -> Result<T> {
        let value = self.decrypt(ciphertext)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn fixed_cipher() -> Cipher {
        let key: [u8; KEY_LEN] = std::array::from_fn(|i| i as u8);
        let iv: [u8; IV_LEN] = std::array::from_fn(|i| (i + 16) as u8);
        Cipher::new(key, iv)
    }

    const KNOWN_CIPHERTEXT: &str = "EK08bkUZxy70yJzZv/zlV2hQo2pCdLZwgRqrQ9UJYb0zxunOoUvFDDR7fodMrby/2e4d4HwsetTP1B39/EYYJw==";

    #[test]
    fn known_answer() {
        let cipher = fixed_cipher();
        let payload = serde_json::json!({"apiKey": "sk-1", "id": "k1", "platform": "deepseek"});
        assert_eq!(cipher.encrypt(&payload).unwrap(), KNOWN_CIPHERTEXT);
        assert_eq!(cipher.decrypt(KNOWN_CIPHERTEXT).unwrap(), payload);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let iv = random_bytes(IV_LEN).unwrap();
        let cipher = Cipher::from_slices(&key, &iv).unwrap();

        for payload in [
            serde_json::json!(null),
            serde_json::json!(""),
            serde_json::json!([1, 2.5, "three", {"four": [4]}]),
            serde_json::json!({"unicode": "密钥 🔑", "nested": {"a": true}}),
        ] {
            let ciphertext = cipher.encrypt(&payload).unwrap();
            assert_eq!(cipher.decrypt(&ciphertext).unwrap(), payload);
        }
    }

    #[test]
    fn flipping_any_byte_is_detected() {
        let cipher = fixed_cipher();
        let raw = BASE64.decode(KNOWN_CIPHERTEXT).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = cipher.decrypt(&BASE64.encode(&tampered));
            assert!(
                matches!(result, Err(VaultError::MalformedCiphertext { .. })),
                "byte {i} flip went undetected"
            );
        }
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let other = Cipher::new([7u8; KEY_LEN], [9u8; IV_LEN]);
        let result = other.decrypt(KNOWN_CIPHERTEXT);
        assert!(matches!(result, Err(VaultError::MalformedCiphertext { .. })));
    }

    #[test]
    fn invalid_base64_rejected() {
        let result = fixed_cipher().decrypt("not base64 at all!");
        assert!(matches!(result, Err(VaultError::MalformedCiphertext { .. })));
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let raw = BASE64.decode(KNOWN_CIPHERTEXT).unwrap();
        let truncated = BASE64.encode(&raw[..raw.len() - 3]);
        let result = fixed_cipher().decrypt(&truncated);
        assert!(matches!(result, Err(VaultError::MalformedCiphertext { .. })));
    }

    #[test]
    fn non_json_plaintext_rejected() {
        let cipher = fixed_cipher();
        let ciphertext = cipher.encrypt_bytes(b"plain words");
        let result = cipher.decrypt(&ciphertext);
        assert!(matches!(result, Err(VaultError::MalformedCiphertext { .. })));
    }

    #[test]
    fn decrypt_as_schema_mismatch_is_serialization_error() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Expected {
            count: u32,
        }

        let cipher = fixed_cipher();
        let ciphertext = cipher.encrypt(&serde_json::json!({"count": "many"})).unwrap();
        let result = cipher.decrypt_as::<Expected>(&ciphertext);
        assert!(matches!(result, Err(VaultError::Serialization(_))));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let result = Cipher::from_slices(&[0u8; 16], &[0u8; IV_LEN]);
        assert!(result.is_err());
    }

    #[test]
    fn random_bytes_correct_length() {
        let bytes = random_bytes(64).unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[test]
    fn debug_hides_key_material() {
        let debug = format!("{:?}", fixed_cipher());
        assert_eq!(debug, "Cipher { .. }");
    }
}
