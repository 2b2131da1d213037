//! `QuotaService`: one handle over the vault, the caches and the provider
//! clients.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use apiwallet_store::{Clock, DEFAULT_TTL, KeyValueStore, SystemClock, TtlCache};
use apiwallet_vault::{CredentialRecord, CredentialStatus, NormalizedQuota, Platform, Vault};
use tokio::task::JoinHandle;
use tracing::info;

use crate::balance::{BalanceNormalizer, BalanceOutcome, QUOTA_CACHE_NAMESPACE, cache_key};
use crate::catalog::{ProviderEntry, ProviderRegistry};
use crate::client::SignedClient;
use crate::error::{ProviderError, Result};
use crate::models::{MODEL_CACHE_NAMESPACE, ModelLister};
use crate::probe::{
    AVAILABILITY_CACHE_NAMESPACE, ModelAvailability, ModelProber, availability_prefix,
};
use crate::transport::{DEFAULT_TIMEOUT, HttpTransport, ReqwestTransport};

/// Credential management plus every provider query, with results cached.
pub struct QuotaService {
    vault: Vault,
    client: Arc<SignedClient>,
    clock: Arc<dyn Clock>,
    quota_cache: Arc<TtlCache<NormalizedQuota>>,
    model_cache: Arc<TtlCache<Vec<String>>>,
    availability_cache: Arc<TtlCache<ModelAvailability>>,
    balances: BalanceNormalizer,
    models: ModelLister,
    prober: ModelProber,
}

impl QuotaService {
    /// Start building a service persisted in `store`.
    pub fn builder(store: Arc<dyn KeyValueStore>) -> QuotaServiceBuilder {
        QuotaServiceBuilder {
            store,
            transport: None,
            clock: Arc::new(SystemClock),
            registry: None,
            cache_ttl: DEFAULT_TTL,
            http_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        self.client.registry()
    }

    /// Every registered provider in catalog order.
    pub fn providers(&self) -> Vec<&ProviderEntry> {
        self.registry().entries()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Store a new credential and return it.
    pub fn add_credential(
        &self,
        platform: Platform,
        name: &str,
        api_key: &str,
        api_secret: Option<&str>,
        tags: impl IntoIterator<Item = String>,
    ) -> Result<CredentialRecord> {
        self.registry().get(platform)?;

        let mut record = CredentialRecord::new(platform, name, api_key, self.clock.now())
            .with_tags(tags);
        if let Some(secret) = api_secret.filter(|s| !s.is_empty()) {
            record = record.with_secret(secret);
        }
        self.vault.save(record.clone())?;
        Ok(record)
    }

    pub fn list_credentials(&self) -> Result<Vec<CredentialRecord>> {
        Ok(self.vault.get_all()?)
    }

    pub fn get_credential(&self, id: &str) -> Result<CredentialRecord> {
        Ok(self.vault.get(id)?)
    }

    /// Delete a credential and every cached result that belongs to it.
    pub fn remove_credential(&self, id: &str) -> Result<()> {
        let record = self.vault.get(id)?;
        self.vault.delete(id)?;

        let key = cache_key(&record);
        self.quota_cache.delete(&key)?;
        self.model_cache.delete(&key)?;
        let probes = self
            .availability_cache
            .delete_prefix(&availability_prefix(&record))?;
        info!(id = id, platform = %record.platform, probes, "credential removed with cached results");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Provider queries
    // -----------------------------------------------------------------------

    /// Query a credential's balance. A normalized quota is also recorded on
    /// the credential as its last balance, marking it valid.
    pub async fn refresh_balance(&self, id: &str, force_refresh: bool) -> Result<BalanceOutcome> {
        let record = self.vault.get(id)?;
        let outcome = self.balances.query(&record, force_refresh).await?;
        if let BalanceOutcome::Quota(quota) = &outcome {
            self.vault
                .update_status(id, CredentialStatus::Valid, Some(quota.clone()))?;
        }
        Ok(outcome)
    }

    /// Check whether the provider accepts a credential and record the answer.
    pub async fn check_credential(&self, id: &str) -> Result<CredentialStatus> {
        let record = self.vault.get(id)?;
        let status = self.prober.check_token(&record).await?;
        self.vault.update_status(id, status, None)?;
        Ok(status)
    }

    pub async fn list_models(&self, id: &str, force_refresh: bool) -> Result<Vec<String>> {
        let record = self.vault.get(id)?;
        self.models.list(&record, force_refresh).await
    }

    pub async fn probe_model(
        &self,
        id: &str,
        model: &str,
        force_refresh: bool,
    ) -> Result<ModelAvailability> {
        let record = self.vault.get(id)?;
        self.prober.probe(&record, model, force_refresh).await
    }

    // -----------------------------------------------------------------------
    // Caches
    // -----------------------------------------------------------------------

    /// Drop every cached result.
    pub fn clear_caches(&self) -> Result<()> {
        self.quota_cache.clear()?;
        self.model_cache.clear()?;
        self.availability_cache.clear()?;
        info!("all caches cleared");
        Ok(())
    }

    /// Sweep all three caches every `period`. Must be called from within a
    /// tokio runtime.
    pub fn spawn_sweepers(&self, period: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.quota_cache.spawn_sweeper(period),
            self.model_cache.spawn_sweeper(period),
            self.availability_cache.spawn_sweeper(period),
        ]
    }

    /// Tags in use across all credentials.
    pub fn tags(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .vault
            .get_all()?
            .into_iter()
            .flat_map(|r| r.tags)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`QuotaService`].
pub struct QuotaServiceBuilder {
    store: Arc<dyn KeyValueStore>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Arc<dyn Clock>,
    registry: Option<ProviderRegistry>,
    cache_ttl: Duration,
    http_timeout: Duration,
}

impl QuotaServiceBuilder {
    /// Send requests through `transport` instead of a `reqwest` client.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `registry` instead of the built-in catalog.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Lifetime of every cached result.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Timeout of the default `reqwest` transport. Ignored when a
    /// transport is supplied.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Open the vault (initializing it on first use) and the caches.
    pub fn build(self) -> Result<QuotaService> {
        let vault = Vault::open(Arc::clone(&self.store))?.with_clock(Arc::clone(&self.clock));

        let quota_cache = Arc::new(self.cache(QUOTA_CACHE_NAMESPACE)?);
        let model_cache = Arc::new(self.cache(MODEL_CACHE_NAMESPACE)?);
        let availability_cache = Arc::new(self.cache(AVAILABILITY_CACHE_NAMESPACE)?);

        let registry = match self.registry {
            Some(registry) => registry,
            None => ProviderRegistry::builtin()?,
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.http_timeout).map_err(|e| {
                ProviderError::HttpClient {
                    reason: e.to_string(),
                }
            })?),
        };

        let client = Arc::new(SignedClient::new(
            Arc::new(registry),
            transport,
            Arc::clone(&self.clock),
        ));

        info!(
            providers = client.registry().entries().len(),
            cache_ttl_secs = self.cache_ttl.as_secs(),
            "quota service ready"
        );

        Ok(QuotaService {
            balances: BalanceNormalizer::new(Arc::clone(&client), Arc::clone(&quota_cache)),
            models: ModelLister::new(Arc::clone(&client), Arc::clone(&model_cache)),
            prober: ModelProber::new(Arc::clone(&client), Arc::clone(&availability_cache)),
            vault,
            client,
            clock: self.clock,
            quota_cache,
            model_cache,
            availability_cache,
        })
    }

    fn cache<T>(&self, namespace: &str) -> Result<TtlCache<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + 'static,
    {
        Ok(TtlCache::builder(namespace, Arc::clone(&self.store))
            .ttl(self.cache_ttl)
            .clock(Arc::clone(&self.clock))
            .build()?)
    }
}
