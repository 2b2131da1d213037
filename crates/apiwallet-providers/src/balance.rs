//! Balance queries.
//!
//! One query walks `CacheLookup → Signing → Requesting → ParsingResponse →
//! CacheStore`, stopping early on a cache hit or an error. Providers without
//! a balance endpoint short-circuit to [`BalanceOutcome::Unsupported`]
//! before the cache or network is touched, and HMAC-signed providers
//! without a secret fail with `MissingSecret` just as early.

use std::sync::Arc;

use apiwallet_store::TtlCache;
use apiwallet_vault::{CredentialRecord, NormalizedQuota};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::BalanceEndpoint;
use crate::client::{SignedClient, error_for_status, generic_error_message};
use crate::error::{ProviderError, Result};
use crate::transport::HttpMethod;

/// Store namespace of the quota cache.
pub const QUOTA_CACHE_NAMESPACE: &str = "quotaCache";

/// Result of a balance query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BalanceOutcome {
    Quota(NormalizedQuota),
    /// The provider offers no balance API; not an error.
    #[serde(rename_all = "camelCase")]
    Unsupported {
        message: String,
        reference_url: String,
    },
}

/// Cache key for per-credential results: `<providerId>:<credentialId>`.
pub fn cache_key(credential: &CredentialRecord) -> String {
    format!("{}:{}", credential.platform, credential.id)
}

/// Queries balances and normalizes them through the provider's mapping.
pub struct BalanceNormalizer {
    client: Arc<SignedClient>,
    cache: Arc<TtlCache<NormalizedQuota>>,
}

impl BalanceNormalizer {
    pub fn new(client: Arc<SignedClient>, cache: Arc<TtlCache<NormalizedQuota>>) -> Self {
        Self { client, cache }
    }

    /// Query the balance for `credential`.
    ///
    /// A fresh cached result is returned without any network activity
    /// unless `force_refresh` is set; successful results are always cached.
    pub async fn query(
        &self,
        credential: &CredentialRecord,
        force_refresh: bool,
    ) -> Result<BalanceOutcome> {
        let provider = credential.platform;
        let entry = self.client.registry().get(provider)?;

        let (path, mapping) = match (&entry.spec().balance, entry.balance_mapping()) {
            (
                BalanceEndpoint::Unsupported {
                    message,
                    reference_url,
                },
                _,
            ) => {
                debug!(provider = %provider, credential = %credential.id, "balance unsupported");
                return Ok(BalanceOutcome::Unsupported {
                    message: (*message).to_string(),
                    reference_url: (*reference_url).to_string(),
                });
            }
            (BalanceEndpoint::Query { path, .. }, Some(mapping)) => (*path, mapping),
            (BalanceEndpoint::Query { .. }, None) => {
                return Err(ProviderError::InvalidMapping {
                    provider,
                    reason: "balance endpoint without a compiled mapping".into(),
                });
            }
        };
        self.client.ensure_secret(credential)?;

        let key = cache_key(credential);
        if force_refresh {
            debug!(provider = %provider, credential = %credential.id, "cache bypassed");
        } else if let Some(hit) = self.cache.get(&key)? {
            debug!(provider = %provider, credential = %credential.id, "balance cache hit");
            return Ok(BalanceOutcome::Quota(hit));
        }

        let response = self
            .client
            .send(credential, HttpMethod::Get, path, None)
            .await?;

        debug!(provider = %provider, credential = %credential.id, "parsing balance response");
        let body = response.json();

        if !response.is_success() {
            let message = body
                .as_ref()
                .and_then(|b| mapping.error_message(b).or_else(|| generic_error_message(b)));
            let err = error_for_status(provider, &response, message);
            warn!(provider = %provider, credential = %credential.id, status = response.status, %err, "balance query failed");
            return Err(err);
        }

        let Some(body) = body else {
            return Err(ProviderError::Transport {
                provider,
                status: Some(response.status),
                reason: "response body is not JSON".into(),
            });
        };

        if !mapping.is_success(&body) {
            let message = mapping
                .error_message(&body)
                .unwrap_or_else(|| "provider reported failure without a message".into());
            warn!(provider = %provider, credential = %credential.id, message = %message, "balance query rejected");
            return Err(ProviderError::ProviderRejected { provider, message });
        }

        let quota = mapping
            .normalize(&body)
            .map_err(|message| ProviderError::ProviderRejected { provider, message })?;

        self.cache.set(key, quota.clone())?;
        debug!(provider = %provider, credential = %credential.id, "balance cached");
        Ok(BalanceOutcome::Quota(quota))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwallet_vault::Platform;
    use chrono::Utc;

    #[test]
    fn cache_key_is_provider_and_id() {
        let mut record = CredentialRecord::new(Platform::ZhipuGlm, "n", "k", Utc::now());
        record.id = "k1".into();
        assert_eq!(cache_key(&record), "zhipu_glm:k1");
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = BalanceOutcome::Unsupported {
            message: "no api".into(),
            reference_url: "https://example.com".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "unsupported");
        assert_eq!(json["referenceUrl"], "https://example.com");

        let quota =
            BalanceOutcome::Quota(NormalizedQuota::new(1.0, 2.0, 1.0, "", Default::default()));
        let json = serde_json::to_value(&quota).unwrap();
        assert_eq!(json["kind"], "quota");
        assert_eq!(json["usedRatio"], 0.5);
        let back: BalanceOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, quota);
    }
}
