//! Token checks and model availability probes.
//!
//! Both send the smallest possible chat completion: one user message and
//! `max_tokens: 1`. A token check only cares whether the provider accepted
//! the credential; a probe also times the round trip and is cached.

use std::sync::Arc;

use apiwallet_store::TtlCache;
use apiwallet_vault::{CredentialRecord, CredentialStatus, Platform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::client::{SignedClient, error_for_status, generic_error_message};
use crate::error::Result;
use crate::transport::{HttpMethod, HttpResponse};

/// Store namespace of the availability cache.
pub const AVAILABILITY_CACHE_NAMESPACE: &str = "availabilityCache";

/// How a model responded to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    /// 2xx.
    Normal,
    /// 429: reachable but rate limited.
    Limited,
    /// Any other HTTP status.
    Unavailable,
}

impl AvailabilityStatus {
    fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Normal,
            429 => Self::Limited,
            _ => Self::Unavailable,
        }
    }
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Limited => "limited",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Result of one availability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAvailability {
    pub platform: Platform,
    pub model_id: String,
    pub latency_ms: u64,
    pub status: AvailabilityStatus,
    pub checked_at: DateTime<Utc>,
}

/// Cache key of a probe: `<providerId>:<credentialId>:<model>`.
pub fn availability_key(credential: &CredentialRecord, model: &str) -> String {
    format!("{}:{}:{model}", credential.platform, credential.id)
}

/// Prefix shared by every probe key of `credential`.
pub fn availability_prefix(credential: &CredentialRecord) -> String {
    format!("{}:{}:", credential.platform, credential.id)
}

/// Body of the one-token chat completion used by checks and probes.
pub fn chat_probe_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": "Hello" }],
        "max_tokens": 1,
    })
}

/// Sends chat probes for credentials.
pub struct ModelProber {
    client: Arc<SignedClient>,
    cache: Arc<TtlCache<ModelAvailability>>,
}

impl ModelProber {
    pub fn new(client: Arc<SignedClient>, cache: Arc<TtlCache<ModelAvailability>>) -> Self {
        Self { client, cache }
    }

    /// Check whether the provider accepts `credential`.
    ///
    /// 2xx is `Valid` and 401/403 is `Invalid`. Any other status is an
    /// error, since it says nothing about the credential itself.
    pub async fn check_token(&self, credential: &CredentialRecord) -> Result<CredentialStatus> {
        let provider = credential.platform;
        let spec = self.client.registry().get(provider)?.spec();
        let (chat_path, model) = (spec.chat_path, spec.default_model);
        self.client.ensure_secret(credential)?;

        let response = self
            .client
            .send(
                credential,
                HttpMethod::Post,
                chat_path,
                Some(chat_probe_body(model)),
            )
            .await?;

        let status = match response.status {
            200..=299 => CredentialStatus::Valid,
            401 | 403 => CredentialStatus::Invalid,
            _ => return Err(rejection(provider, &response)),
        };
        info!(provider = %provider, credential = %credential.id, status = %status, "token checked");
        Ok(status)
    }

    /// Probe `model` with `credential`, timing the round trip.
    pub async fn probe(
        &self,
        credential: &CredentialRecord,
        model: &str,
        force_refresh: bool,
    ) -> Result<ModelAvailability> {
        let provider = credential.platform;
        let chat_path = self.client.registry().get(provider)?.spec().chat_path;
        self.client.ensure_secret(credential)?;

        let key = availability_key(credential, model);
        if !force_refresh {
            if let Some(hit) = self.cache.get(&key)? {
                debug!(provider = %provider, credential = %credential.id, model = model, "availability cache hit");
                return Ok(hit);
            }
        }

        let started = tokio::time::Instant::now();
        let response = self
            .client
            .send(
                credential,
                HttpMethod::Post,
                chat_path,
                Some(chat_probe_body(model)),
            )
            .await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let availability = ModelAvailability {
            platform: provider,
            model_id: model.to_string(),
            latency_ms,
            status: AvailabilityStatus::from_status(response.status),
            checked_at: self.client.now(),
        };
        if availability.status != AvailabilityStatus::Normal {
            warn!(provider = %provider, model = model, status = response.status, "model probe degraded");
        }

        self.cache.set(key, availability.clone())?;
        debug!(provider = %provider, credential = %credential.id, model = model, latency_ms, "availability cached");
        Ok(availability)
    }
}

fn rejection(provider: Platform, response: &HttpResponse) -> crate::error::ProviderError {
    let message = response.json().as_ref().and_then(generic_error_message);
    let err = error_for_status(provider, response, message);
    warn!(provider = %provider, status = response.status, %err, "token check failed");
    err
}
