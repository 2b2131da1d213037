//! Encryption key management.
//!
//! A profile's key material lives in a single [`EncryptionConfig`] record,
//! stored as plain JSON under [`ENCRYPTION_CONFIG_KEY`] in the key-value
//! store. It is created once by [`ensure_vault_initialized`] and never
//! rotated. Losing it makes every credential encrypted under it
//! unrecoverable; corrupt material is reported as
//! [`VaultError::VaultUnrecoverable`] and never silently regenerated.

use apiwallet_store::KeyValueStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::{self, Cipher, IV_LEN, KEY_LEN};
use crate::error::{Result, VaultError};

/// Store key holding the serialized [`EncryptionConfig`].
pub const ENCRYPTION_CONFIG_KEY: &str = "encryptionConfig";

// ---------------------------------------------------------------------------
// EncryptionConfig
// ---------------------------------------------------------------------------

/// Hex-encoded key and IV for the profile's [`Cipher`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub key: String,
    pub iv: String,
}

impl EncryptionConfig {
    /// Generate fresh key material from the system CSPRNG.
    pub fn generate() -> Result<Self> {
        let key = crypto::random_bytes(KEY_LEN)?;
        let iv = crypto::random_bytes(IV_LEN)?;
        Ok(Self {
            key: hex::encode(key),
            iv: hex::encode(iv),
        })
    }

    /// Decode the hex material into a [`Cipher`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::VaultUnrecoverable`] if either field is not
    /// valid hex of the expected length.
    pub fn cipher(&self) -> Result<Cipher> {
        let key = decode_field("key", &self.key, KEY_LEN)?;
        let iv = decode_field("iv", &self.iv, IV_LEN)?;
        Cipher::from_slices(&key, &iv).map_err(|e| VaultError::VaultUnrecoverable {
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

fn decode_field(name: &str, value: &str, expected_len: usize) -> Result<Vec<u8>> {
    let bytes = hex::decode(value).map_err(|e| VaultError::VaultUnrecoverable {
        reason: format!("encryption config {name} is not valid hex: {e}"),
    })?;
    if bytes.len() != expected_len {
        return Err(VaultError::VaultUnrecoverable {
            reason: format!(
                "encryption config {name} must be {expected_len} bytes, got {}",
                bytes.len()
            ),
        });
    }
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Whether [`ensure_vault_initialized`] created new key material or found
/// existing material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Created,
    Loaded,
}

/// The outcome of vault initialization.
#[derive(Debug, Clone)]
pub struct VaultKeys {
    pub cipher: Cipher,
    pub origin: KeyOrigin,
}

/// Read the persisted config, if any.
///
/// # Errors
///
/// Returns [`VaultError::VaultUnrecoverable`] if a config is present but
/// is not valid JSON.
pub fn load_encryption_config(store: &dyn KeyValueStore) -> Result<Option<EncryptionConfig>> {
    let Some(raw) = store.get(ENCRYPTION_CONFIG_KEY)? else {
        return Ok(None);
    };
    let config = serde_json::from_str(&raw).map_err(|e| VaultError::VaultUnrecoverable {
        reason: format!("encryption config is corrupt: {e}"),
    })?;
    Ok(Some(config))
}

/// Load the profile's key material, creating and persisting it on first run.
///
/// Call once at startup, before any vault operation.
pub fn ensure_vault_initialized(store: &dyn KeyValueStore) -> Result<VaultKeys> {
    if let Some(config) = load_encryption_config(store)? {
        debug!("loaded existing encryption config");
        return Ok(VaultKeys {
            cipher: config.cipher()?,
            origin: KeyOrigin::Loaded,
        });
    }

    let config = EncryptionConfig::generate()?;
    store.set(ENCRYPTION_CONFIG_KEY, &serde_json::to_string(&config)?)?;
    info!("generated new encryption config");

    Ok(VaultKeys {
        cipher: config.cipher()?,
        origin: KeyOrigin::Created,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
