//! Signed request execution shared by every provider operation.

use std::sync::Arc;

use apiwallet_store::Clock;
use apiwallet_vault::{CredentialRecord, Platform};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::catalog::{ProviderEntry, ProviderRegistry};
use crate::error::{ProviderError, Result};
use crate::mapping::FieldPath;
use crate::signer::SigningInput;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Paths tried, in order, for an error message in a provider body that has
/// no dedicated mapping.
const GENERIC_ERROR_PATHS: &[&str] = &[
    "error.message",
    "message",
    "msg",
    "error_msg",
    "ResponseMetadata.Error.Message",
    "error",
];

/// Signs and sends requests for a credential.
pub struct SignedClient {
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl SignedClient {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            transport,
            clock,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Current time on the client's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fail with `MissingSecret` if the provider's scheme needs a secret
    /// the credential lacks.
    pub fn ensure_secret(&self, credential: &CredentialRecord) -> Result<()> {
        let entry = self.registry.get(credential.platform)?;
        let has_secret = credential
            .api_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if entry.spec().signing.requires_secret() && !has_secret {
            return Err(ProviderError::MissingSecret {
                provider: credential.platform,
            });
        }
        Ok(())
    }

    /// Sign `method path` for `credential` with the current time and send it.
    ///
    /// Exactly one request is made. A failure to get any response becomes
    /// [`ProviderError::Transport`]; every HTTP status is returned as-is.
    pub async fn send(
        &self,
        credential: &CredentialRecord,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<HttpResponse> {
        let entry = self.registry.get(credential.platform)?;
        let url = entry.url(path)?;
        let host = authority(entry, &url);

        let headers = entry.spec().signing.sign(&SigningInput {
            provider: credential.platform,
            method: method.as_str(),
            host: &host,
            path: url.path(),
            token: &credential.api_key,
            secret: credential.api_secret.as_deref(),
            timestamp: self.clock.now(),
        })?;
        debug!(provider = %credential.platform, credential = %credential.id, path = path, "request signed");

        let response = self
            .transport
            .send(HttpRequest {
                method,
                url,
                headers,
                body,
            })
            .await
            .map_err(|failure| ProviderError::Transport {
                provider: credential.platform,
                status: None,
                reason: if failure.timed_out {
                    format!("request timed out: {}", failure.reason)
                } else {
                    failure.reason
                },
            })?;

        debug!(
            provider = %credential.platform,
            credential = %credential.id,
            status = response.status,
            "response received"
        );
        Ok(response)
    }
}

fn authority(entry: &ProviderEntry, url: &url::Url) -> String {
    let host = url
        .host_str()
        .or_else(|| entry.base_url().host_str())
        .unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// The best-effort error message in an arbitrary provider body.
pub(crate) fn generic_error_message(body: &Value) -> Option<String> {
    GENERIC_ERROR_PATHS
        .iter()
        .filter_map(|p| FieldPath::parse(p).ok())
        .find_map(|p| {
            p.lookup(body).and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
        })
}

/// Turn a non-2xx response into the matching error: `ProviderRejected` if
/// the body names a reason, `Transport` otherwise.
pub(crate) fn error_for_status(
    provider: Platform,
    response: &HttpResponse,
    message: Option<String>,
) -> ProviderError {
    match message {
        Some(message) => ProviderError::ProviderRejected { provider, message },
        None => ProviderError::Transport {
            provider,
            status: Some(response.status),
            reason: format!("HTTP {} with no usable error body", response.status),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generic_message_paths() {
        assert_eq!(
            generic_error_message(&json!({"error": {"message": "bad key"}})).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            generic_error_message(&json!({"error": "plain"})).as_deref(),
            Some("plain")
        );
        assert_eq!(generic_error_message(&json!({"status": 500})), None);
    }

    #[test]
    fn status_error_classification() {
        let response = HttpResponse {
            status: 500,
            body: "oops".into(),
        };
        assert!(matches!(
            error_for_status(Platform::Kimi, &response, None),
            ProviderError::Transport {
                status: Some(500),
                ..
            }
        ));
        assert!(matches!(
            error_for_status(Platform::Kimi, &response, Some("quota".into())),
            ProviderError::ProviderRejected { .. }
        ));
    }
}
