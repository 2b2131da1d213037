//! Error types for provider queries.
//!
//! Every failure is sorted into an [`ErrorClass`] so the host can tell
//! "retry may help" from "fix your input" from "stored data is damaged"
//! without matching on individual variants.

use apiwallet_store::StoreError;
use apiwallet_vault::{Platform, VaultError};

/// Broad category of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or setup: missing secret, unknown provider or credential.
    Configuration,
    /// Stored data cannot be read back.
    Integrity,
    /// Network failure, timeout, or an unparseable non-2xx response.
    Transport,
    /// The provider answered and refused the request.
    Provider,
}

/// Errors that can occur while talking to a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider's signing scheme needs a secret and the credential has none.
    #[error("provider {provider} requires an API secret")]
    MissingSecret { provider: Platform },

    /// The registry has no entry for this provider.
    #[error("provider {provider} is not registered")]
    NotRegistered { provider: Platform },

    /// The request never produced a usable response.
    #[error("transport error ({provider}): {reason}")]
    Transport {
        provider: Platform,
        status: Option<u16>,
        reason: String,
    },

    /// The provider answered with an application-level error.
    #[error("provider {provider} rejected the request: {message}")]
    ProviderRejected { provider: Platform, message: String },

    /// A provider's response mapping failed validation.
    #[error("invalid response mapping for {provider}: {reason}")]
    InvalidMapping { provider: Platform, reason: String },

    /// The HTTP client could not be constructed.
    #[error("HTTP client setup failed: {reason}")]
    HttpClient { reason: String },

    /// Credential lookup or decryption failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Cache persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProviderError {
    /// The broad category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingSecret { .. }
            | Self::NotRegistered { .. }
            | Self::InvalidMapping { .. }
            | Self::HttpClient { .. } => ErrorClass::Configuration,
            Self::Transport { .. } => ErrorClass::Transport,
            Self::ProviderRejected { .. } => ErrorClass::Provider,
            Self::Vault(err) if err.is_integrity() => ErrorClass::Integrity,
            Self::Vault(VaultError::CredentialNotFound { .. } | VaultError::UnknownProvider { .. }) => {
                ErrorClass::Configuration
            }
            Self::Vault(_) | Self::Store(_) => ErrorClass::Integrity,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }
}

/// Convenience alias used throughout the providers crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
