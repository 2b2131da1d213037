//! Model listing.

use std::sync::Arc;

use apiwallet_store::TtlCache;
use apiwallet_vault::CredentialRecord;
use serde_json::json;
use tracing::{debug, warn};

use crate::balance::cache_key;
use crate::client::{SignedClient, error_for_status, generic_error_message};
use crate::error::{ProviderError, Result};
use crate::transport::HttpMethod;

/// Store namespace of the model-list cache.
pub const MODEL_CACHE_NAMESPACE: &str = "modelCache";

/// Lists the models a credential can use.
pub struct ModelLister {
    client: Arc<SignedClient>,
    cache: Arc<TtlCache<Vec<String>>>,
}

impl ModelLister {
    pub fn new(client: Arc<SignedClient>, cache: Arc<TtlCache<Vec<String>>>) -> Self {
        Self { client, cache }
    }

    /// Model ids visible to `credential`, served from cache when fresh.
    pub async fn list(
        &self,
        credential: &CredentialRecord,
        force_refresh: bool,
    ) -> Result<Vec<String>> {
        let provider = credential.platform;
        let entry = self.client.registry().get(provider)?;
        let endpoint = entry.spec().models;
        self.client.ensure_secret(credential)?;

        let key = cache_key(credential);
        if !force_refresh {
            if let Some(hit) = self.cache.get(&key)? {
                debug!(provider = %provider, credential = %credential.id, models = hit.len(), "model cache hit");
                return Ok(hit);
            }
        }

        let body = match endpoint.method {
            HttpMethod::Post => Some(json!({})),
            HttpMethod::Get => None,
        };
        let response = self
            .client
            .send(credential, endpoint.method, endpoint.path, body)
            .await?;
        let body = response.json();

        if !response.is_success() {
            let message = body.as_ref().and_then(generic_error_message);
            let err = error_for_status(provider, &response, message);
            warn!(provider = %provider, credential = %credential.id, status = response.status, %err, "model list failed");
            return Err(err);
        }

        let Some(ids) = body.as_ref().and_then(|b| entry.model_ids().collect(b)) else {
            let message = body
                .as_ref()
                .and_then(generic_error_message)
                .unwrap_or_else(|| format!("response has no `{}` list", endpoint.ids));
            warn!(provider = %provider, credential = %credential.id, message = %message, "model list rejected");
            return Err(ProviderError::ProviderRejected { provider, message });
        };

        self.cache.set(key, ids.clone())?;
        debug!(provider = %provider, credential = %credential.id, models = ids.len(), "model list cached");
        Ok(ids)
    }
}
