//! Credential data model.
//!
//! [`CredentialRecord`] is what the vault stores; [`NormalizedQuota`] is the
//! provider-independent balance shape recorded on it after a query.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// A supported AI-model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Deepseek,
    Kimi,
    Siliconflow,
    ZhipuGlm,
    BaiduQianfan,
    Doubao,
    Dashscope,
    Openai,
    Anthropic,
}

impl Platform {
    /// Every platform, in catalog order.
    pub const ALL: [Platform; 9] = [
        Self::Deepseek,
        Self::Kimi,
        Self::Siliconflow,
        Self::ZhipuGlm,
        Self::BaiduQianfan,
        Self::Doubao,
        Self::Dashscope,
        Self::Openai,
        Self::Anthropic,
    ];

    /// The stable provider id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Kimi => "kimi",
            Self::Siliconflow => "siliconflow",
            Self::ZhipuGlm => "zhipu_glm",
            Self::BaiduQianfan => "baidu_qianfan",
            Self::Doubao => "doubao",
            Self::Dashscope => "dashscope",
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| VaultError::UnknownProvider { id: s.to_string() })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Last known validity of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Valid,
    Invalid,
    Unknown,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
        })
    }
}

// ---------------------------------------------------------------------------
// NormalizedQuota
// ---------------------------------------------------------------------------

/// Balance information in one provider-independent shape.
///
/// Fields are private so the ratio invariant always holds: when
/// `total_tokens > 0`, `used_ratio == used_tokens / total_tokens`,
/// otherwise `used_ratio == 0`. Deserialized values are re-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "QuotaFields")]
pub struct NormalizedQuota {
    remaining_tokens: f64,
    total_tokens: f64,
    used_tokens: f64,
    used_ratio: f64,
    reset_description: String,
    provider_extras: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedQuota {
    /// Build a quota, coercing non-finite or negative amounts to zero and
    /// clamping `used` to `total` when a total is known.
    pub fn new(
        remaining: f64,
        total: f64,
        used: f64,
        reset_description: impl Into<String>,
        provider_extras: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let remaining = sanitize(remaining);
        let total = sanitize(total);
        let mut used = sanitize(used);

        let used_ratio = if total > 0.0 {
            used = used.min(total);
            used / total
        } else {
            0.0
        };

        Self {
            remaining_tokens: remaining,
            total_tokens: total,
            used_tokens: used,
            used_ratio,
            reset_description: reset_description.into(),
            provider_extras,
        }
    }

    pub fn remaining_tokens(&self) -> f64 {
        self.remaining_tokens
    }

    pub fn total_tokens(&self) -> f64 {
        self.total_tokens
    }

    pub fn used_tokens(&self) -> f64 {
        self.used_tokens
    }

    pub fn used_ratio(&self) -> f64 {
        self.used_ratio
    }

    pub fn reset_description(&self) -> &str {
        &self.reset_description
    }

    /// Provider-specific fields that have no normalized counterpart.
    pub fn provider_extras(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.provider_extras
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaFields {
    #[serde(default)]
    remaining_tokens: f64,
    #[serde(default)]
    total_tokens: f64,
    #[serde(default)]
    used_tokens: f64,
    #[serde(default)]
    reset_description: String,
    #[serde(default)]
    provider_extras: serde_json::Map<String, serde_json::Value>,
}

impl From<QuotaFields> for NormalizedQuota {
    fn from(f: QuotaFields) -> Self {
        Self::new(
            f.remaining_tokens,
            f.total_tokens,
            f.used_tokens,
            f.reset_description,
            f.provider_extras,
        )
    }
}

// ---------------------------------------------------------------------------
// CredentialRecord
// ---------------------------------------------------------------------------

/// One stored provider credential.
///
/// Identity is `id`; new records get a time-ordered UUIDv7 so ids are never
/// reused after deletion.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub platform: Platform,
    pub name: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CredentialStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_balance: Option<NormalizedQuota>,
}

impl CredentialRecord {
    /// Create a record with a fresh id, stamped with `now`.
    pub fn new(
        platform: Platform,
        name: impl Into<String>,
        api_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            platform,
            name: name.into(),
            api_key: api_key.into(),
            api_secret: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            status: None,
            last_balance: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("tags", &self.tags)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("status", &self.status)
            .field("last_balance", &self.last_balance)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_ids_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
            let json = serde_json::to_string(&platform).unwrap();
            assert_eq!(json, format!("\"{}\"", platform.as_str()));
        }
    }

    #[test]
    fn unknown_platform_rejected() {
        let err = "tongyi".parse::<Platform>().unwrap_err();
        assert!(matches!(err, VaultError::UnknownProvider { id } if id == "tongyi"));
    }

    #[test]
    fn quota_ratio_invariant() {
        let q = NormalizedQuota::new(750.0, 1000.0, 250.0, "", Default::default());
        assert!((q.used_ratio() - 0.25).abs() < 1e-9);

        let q = NormalizedQuota::new(10.0, 0.0, 0.0, "", Default::default());
        assert_eq!(q.used_ratio(), 0.0);
    }

    #[test]
    fn quota_sanitizes_inputs() {
        let q = NormalizedQuota::new(f64::NAN, -5.0, f64::INFINITY, "", Default::default());
        assert_eq!(q.remaining_tokens(), 0.0);
        assert_eq!(q.total_tokens(), 0.0);
        assert_eq!(q.used_tokens(), 0.0);
        assert_eq!(q.used_ratio(), 0.0);
    }

    #[test]
    fn quota_clamps_used_to_total() {
        let q = NormalizedQuota::new(0.0, 100.0, 150.0, "", Default::default());
        assert_eq!(q.used_tokens(), 100.0);
        assert_eq!(q.used_ratio(), 1.0);
    }

    #[test]
    fn quota_deserialize_renormalizes() {
        let json = r#"{"remainingTokens":1,"totalTokens":4,"usedTokens":3,"usedRatio":0.9,"resetDescription":"monthly","providerExtras":{"currency":"CNY"}}"#;
        let q: NormalizedQuota = serde_json::from_str(json).unwrap();
        assert!((q.used_ratio() - 0.75).abs() < 1e-9);
        assert_eq!(q.reset_description(), "monthly");
        assert_eq!(q.provider_extras()["currency"], "CNY");
    }

    #[test]
    fn record_serializes_camel_case() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = CredentialRecord::new(Platform::BaiduQianfan, "work", "ak", now)
            .with_secret("sk")
            .with_tags(["prod", "cn"]);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["platform"], "baidu_qianfan");
        assert_eq!(json["apiKey"], "ak");
        assert_eq!(json["apiSecret"], "sk");
        assert_eq!(json["tags"], serde_json::json!(["cn", "prod"]));
        assert_eq!(json["createdAt"], "2023-11-14T22:13:20Z");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn record_ids_are_unique() {
        let now = Utc::now();
        let a = CredentialRecord::new(Platform::Kimi, "a", "k", now);
        let b = CredentialRecord::new(Platform::Kimi, "b", "k", now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn record_debug_redacts_secrets() {
        let record =
            CredentialRecord::new(Platform::Doubao, "x", "AKLT-visible?", Utc::now())
                .with_secret("top-secret");
        let debug = format!("{record:?}");
        assert!(!debug.contains("AKLT-visible?"));
        assert!(!debug.contains("top-secret"));
    }
}
