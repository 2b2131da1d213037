//! Request signing.
//!
//! Each provider authenticates with one [`SigningScheme`]. Signing is pure:
//! the timestamp is an input, so identical inputs always produce identical
//! headers. Schemes that need an account secret fail with
//! [`ProviderError::MissingSecret`] before any request is built.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use ring::{digest, hmac};

use apiwallet_vault::Platform;

use crate::error::{ProviderError, Result};

/// Header name/value pairs to attach to a request.
pub type Headers = Vec<(String, String)>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SCOPED_SIGNED_HEADERS: &str = "host;x-content-sha256;x-date";
const SCOPED_ALGORITHM: &str = "HMAC-SHA256";
const BCE_AUTH_TAG: &str = "bce-auth-v1";

/// How a provider authenticates requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,

    /// `x-api-key: <token>` plus an `anthropic-version` header.
    HeaderKey { version: &'static str },

    /// Single-pass HMAC-SHA256 over a canonical string, base64 signature,
    /// `bce-auth-v1/<token>/<timestamp>/<window>/<signature>`.
    BceAuthV1 { window_secs: u32 },

    /// Scoped HMAC-SHA256 chain in the SigV4 style: the signing key is
    /// derived from `key_prefix + secret` over date, region, service and
    /// `"request"`, and the hex signature covers a canonical request hash.
    ScopedHmac {
        region: &'static str,
        service: &'static str,
        key_prefix: &'static str,
    },
}

/// Everything a scheme may need to sign one request.
#[derive(Debug, Clone)]
pub struct SigningInput<'a> {
    pub provider: Platform,
    pub method: &'a str,
    /// `host[:port]` as sent in the `Host` header.
    pub host: &'a str,
    pub path: &'a str,
    pub token: &'a str,
    pub secret: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

impl SigningScheme {
    /// Whether this scheme needs the credential's secret.
    pub fn requires_secret(&self) -> bool {
        matches!(self, Self::BceAuthV1 { .. } | Self::ScopedHmac { .. })
    }

    /// Produce the authentication headers for `input`.
    pub fn sign(&self, input: &SigningInput<'_>) -> Result<Headers> {
        match self {
            Self::Bearer => Ok(vec![(
                "Authorization".into(),
                format!("Bearer {}", input.token),
            )]),
            Self::HeaderKey { version } => Ok(vec![
                ("x-api-key".into(), input.token.to_string()),
                ("anthropic-version".into(), (*version).to_string()),
            ]),
            Self::BceAuthV1 { window_secs } => {
                let secret = require_secret(input)?;
                Ok(vec![(
                    "Authorization".into(),
                    bce_authorization(input, secret, *window_secs),
                )])
            }
            Self::ScopedHmac {
                region,
                service,
                key_prefix,
            } => {
                let secret = require_secret(input)?;
                Ok(scoped_headers(input, secret, region, service, key_prefix))
            }
        }
    }
}

fn require_secret<'a>(input: &SigningInput<'a>) -> Result<&'a str> {
    input
        .secret
        .filter(|s| !s.is_empty())
        .ok_or(ProviderError::MissingSecret {
            provider: input.provider,
        })
}

// ---------------------------------------------------------------------------
// bce-auth-v1
// ---------------------------------------------------------------------------

fn bce_authorization(input: &SigningInput<'_>, secret: &str, window_secs: u32) -> String {
    let timestamp = input.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let canonical = format!(
        "{}\n{}\n\ntimestamp={}&expires={}",
        input.method, input.path, timestamp, window_secs
    );
    let signature = BASE64.encode(hmac_sha256(secret.as_bytes(), canonical.as_bytes()));

    format!(
        "{BCE_AUTH_TAG}/{}/{timestamp}/{window_secs}/{signature}",
        input.token
    )
}

// ---------------------------------------------------------------------------
// Scoped HMAC chain
// ---------------------------------------------------------------------------

fn scoped_headers(
    input: &SigningInput<'_>,
    secret: &str,
    region: &str,
    service: &str,
    key_prefix: &str,
) -> Headers {
    let x_date = input.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date = input.timestamp.format("%Y%m%d").to_string();

    let canonical_request = format!(
        "{}\n{}\n\nhost:{}\nx-content-sha256:{UNSIGNED_PAYLOAD}\nx-date:{x_date}\n\n{SCOPED_SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}",
        input.method, input.path, input.host
    );
    let request_hash = hex::encode(digest::digest(&digest::SHA256, canonical_request.as_bytes()));

    let scope = format!("{date}/{region}/{service}/request");
    let string_to_sign = format!("{SCOPED_ALGORITHM}\n{x_date}\n{scope}\n{request_hash}");

    let mut key = format!("{key_prefix}{secret}").into_bytes();
    for part in [date.as_str(), region, service, "request"] {
        key = hmac_sha256(&key, part.as_bytes());
    }
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    vec![
        (
            "Authorization".into(),
            format!(
                "{SCOPED_ALGORITHM} Credential={}/{scope}, SignedHeaders={SCOPED_SIGNED_HEADERS}, Signature={signature}",
                input.token
            ),
        ),
        ("X-Date".into(), x_date),
        ("X-Content-Sha256".into(), UNSIGNED_PAYLOAD.into()),
    ]
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, message).as_ref().to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
