//! Encrypted credential vault for apiwallet.
//!
//! Provider credentials are kept in one AES-256-CBC encrypted collection in
//! the key-value store. The key and IV are generated once per profile and
//! stored next to it; there is no rotation, and losing them makes stored
//! credentials unrecoverable.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-CBC/PKCS7 cipher over JSON payloads.
//! - [`keys`]: `EncryptionConfig` generation, loading and validation.
//! - [`record`]: `CredentialRecord`, `Platform`, `NormalizedQuota`.
//! - [`vault`]: CRUD over the encrypted collection.
//! - [`error`]: Unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use apiwallet_store::{KeyValueStore, SqliteStore};
//! use apiwallet_vault::{CredentialRecord, Platform, Vault};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open("data/apiwallet.db")?);
//!
//! // Creates the encryption config on first run, loads it afterwards.
//! let vault = Vault::open(store)?;
//!
//! let record = CredentialRecord::new(Platform::BaiduQianfan, "work", "ak-...", chrono::Utc::now())
//!     .with_secret("sk-...")
//!     .with_tags(["prod"]);
//! vault.save(record)?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod keys;
pub mod record;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use crypto::Cipher;
pub use error::{Result, VaultError};
pub use keys::{
    ENCRYPTION_CONFIG_KEY, EncryptionConfig, KeyOrigin, VaultKeys, ensure_vault_initialized,
};
pub use record::{CredentialRecord, CredentialStatus, NormalizedQuota, Platform};
pub use vault::{API_KEYS_KEY, Vault};
