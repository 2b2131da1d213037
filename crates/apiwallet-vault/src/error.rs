//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. The variants split
//! into three groups callers treat differently: tampered or undecryptable
//! data, lost key material, and plain lookup/configuration mistakes.

use apiwallet_store::StoreError;

/// Unified error type for the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (bad key length, RNG failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// The ciphertext does not decode to valid JSON under the current key
    /// (bad base64, bad padding, non-UTF-8 plaintext or invalid JSON).
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: String },

    /// The stored credential collection could not be decrypted with the
    /// current key material.
    #[error("stored credentials could not be decrypted: {reason}")]
    DecryptionFailure { reason: String },

    // -- Key management errors ----------------------------------------------
    /// The encryption config is corrupt, or was regenerated while encrypted
    /// credentials still exist. Previously stored data cannot be recovered.
    #[error("vault unrecoverable: {reason}")]
    VaultUnrecoverable { reason: String },

    // -- Record errors ------------------------------------------------------
    /// No credential with this id exists.
    #[error("credential not found: id={id}")]
    CredentialNotFound { id: String },

    /// The provider id is not one of the supported platforms.
    #[error("unknown provider: {id}")]
    UnknownProvider { id: String },

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key-value store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether this error means stored data is unreadable or gone, as opposed
    /// to a caller mistake.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::MalformedCiphertext { .. }
                | Self::DecryptionFailure { .. }
                | Self::VaultUnrecoverable { .. }
        )
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
