//! Encrypted credential collection.
//!
//! The [`Vault`] keeps every [`CredentialRecord`] in one encrypted JSON array
//! under [`API_KEYS_KEY`]. Each operation reads the whole collection,
//! changes it in memory, and re-encrypts and persists it in one write.
//! There are no partial writes and no cross-call locking; with several
//! writers the last completed write wins.

use std::sync::Arc;

use apiwallet_store::{Clock, KeyValueStore, SystemClock};
use tracing::{debug, info, warn};

use crate::crypto::Cipher;
use crate::error::{Result, VaultError};
use crate::keys::{self, KeyOrigin};
use crate::record::{CredentialRecord, CredentialStatus, NormalizedQuota};

/// Store key holding the encrypted credential collection.
pub const API_KEYS_KEY: &str = "apiKeys";

/// Credential CRUD over an encrypted key-value entry.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use apiwallet_store::{KeyValueStore, SqliteStore};
/// # use apiwallet_vault::{CredentialRecord, Platform, Vault};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open("data/apiwallet.db")?);
/// let vault = Vault::open(store)?;
///
/// let record = CredentialRecord::new(Platform::Deepseek, "personal", "sk-...", chrono::Utc::now());
/// vault.save(record)?;
/// assert_eq!(vault.get_all()?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    store: Arc<dyn KeyValueStore>,
    cipher: Cipher,
    clock: Arc<dyn Clock>,
}

impl Vault {
    /// Initialize key material and open the vault.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::VaultUnrecoverable`] if the encryption config is
    /// corrupt, or if it had to be created while an encrypted collection
    /// already exists (the key that wrote it is gone).
    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let keys = keys::ensure_vault_initialized(store.as_ref())?;

        if keys.origin == KeyOrigin::Created && store.get(API_KEYS_KEY)?.is_some() {
            return Err(VaultError::VaultUnrecoverable {
                reason: "encryption config was missing while stored credentials exist".into(),
            });
        }

        info!(origin = ?keys.origin, "vault opened");
        Ok(Self::with_cipher(store, keys.cipher))
    }

    /// Open with explicit key material, skipping initialization.
    pub fn with_cipher(store: Arc<dyn KeyValueStore>, cipher: Cipher) -> Self {
        Self {
            store,
            cipher,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for `updatedAt` stamps written by the vault itself.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert `record`, or replace every field of the record with the same id.
    pub fn save(&self, record: CredentialRecord) -> Result<()> {
        let mut records = self.load()?;
        let id = record.id.clone();
        let platform = record.platform;

        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record;
                info!(id = %id, platform = %platform, "updated credential");
            }
            None => {
                records.push(record);
                info!(id = %id, platform = %platform, "stored credential");
            }
        }

        self.persist(&records)
    }

    /// Every stored record, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailure`] if the collection exists but
    /// cannot be decrypted with the current key.
    pub fn get_all(&self) -> Result<Vec<CredentialRecord>> {
        self.load()
    }

    /// Look up one record.
    pub fn get(&self, id: &str) -> Result<CredentialRecord> {
        self.load()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| VaultError::CredentialNotFound { id: id.to_string() })
    }

    /// Remove a record. Removing an unknown id is a no-op.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.id != id);

        if records.len() == before {
            debug!(id = id, "delete of unknown credential ignored");
            return Ok(());
        }

        self.persist(&records)?;
        info!(id = id, "deleted credential");
        Ok(())
    }

    /// Record the outcome of a check or balance query on a credential.
    ///
    /// `last_balance` replaces the stored balance only when `Some`.
    pub fn update_status(
        &self,
        id: &str,
        status: CredentialStatus,
        last_balance: Option<NormalizedQuota>,
    ) -> Result<CredentialRecord> {
        let mut record = self.get(id)?;
        record.status = Some(status);
        if let Some(balance) = last_balance {
            record.last_balance = Some(balance);
        }
        record.updated_at = self.clock.now();

        self.save(record.clone())?;
        Ok(record)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn load(&self) -> Result<Vec<CredentialRecord>> {
        let Some(ciphertext) = self.store.get(API_KEYS_KEY)? else {
            return Ok(Vec::new());
        };

        self.cipher
            .decrypt_as::<Vec<CredentialRecord>>(&ciphertext)
            .map_err(|e| match e {
                VaultError::MalformedCiphertext { reason } => {
                    warn!("credential collection failed to decrypt");
                    VaultError::DecryptionFailure { reason }
                }
                other => other,
            })
    }

    fn persist(&self, records: &[CredentialRecord]) -> Result<()> {
        let ciphertext = self.cipher.encrypt(records)?;
        self.store.set(API_KEYS_KEY, &ciphertext)?;
        debug!(count = records.len(), "persisted credential collection");
        Ok(())
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
