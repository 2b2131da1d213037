//! Provider access for apiwallet.
//!
//! Signs requests for each supported LLM provider, queries balances and
//! normalizes them into [`NormalizedQuota`](apiwallet_vault::NormalizedQuota),
//! lists models and probes their availability. Every result is cached per
//! credential with a TTL.
//!
//! # Modules
//!
//! - [`signer`]: Bearer, header-key, bce-auth-v1 and scoped HMAC signing.
//! - [`catalog`]: Per-provider endpoints, signing schemes and field mappings.
//! - [`mapping`]: Declarative response-field mapping, validated up front.
//! - [`transport`]: The `HttpTransport` seam and its `reqwest` implementation.
//! - [`client`]: Signs and sends one request for a credential.
//! - [`balance`]: Balance query state machine.
//! - [`models`]: Model listing.
//! - [`probe`]: Token checks and availability probes.
//! - [`service`]: `QuotaService`, the facade the CLI uses.
//! - [`error`]: `ProviderError` and its classification.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use apiwallet_store::{KeyValueStore, SqliteStore};
//! use apiwallet_providers::{BalanceOutcome, QuotaService};
//! use apiwallet_vault::Platform;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open("data/apiwallet.db")?);
//! let service = QuotaService::builder(store).build()?;
//!
//! let record = service.add_credential(Platform::Deepseek, "main", "sk-...", None, [])?;
//! match service.refresh_balance(&record.id, false).await? {
//!     BalanceOutcome::Quota(quota) => println!("{} left", quota.remaining_tokens()),
//!     BalanceOutcome::Unsupported { reference_url, .. } => println!("see {reference_url}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod catalog;
pub mod client;
pub mod error;
pub mod mapping;
pub mod models;
pub mod probe;
pub mod service;
pub mod signer;
pub mod transport;

pub use balance::{BalanceNormalizer, BalanceOutcome, QUOTA_CACHE_NAMESPACE, cache_key};
pub use catalog::{BalanceEndpoint, ModelsEndpoint, ProviderEntry, ProviderRegistry, ProviderSpec};
pub use client::SignedClient;
pub use error::{ErrorClass, ProviderError, Result};
pub use models::{MODEL_CACHE_NAMESPACE, ModelLister};
pub use probe::{
    AVAILABILITY_CACHE_NAMESPACE, AvailabilityStatus, ModelAvailability, ModelProber,
};
pub use service::{QuotaService, QuotaServiceBuilder};
pub use signer::{Headers, SigningInput, SigningScheme};
pub use transport::{
    DEFAULT_TIMEOUT, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    TransportFailure,
};
