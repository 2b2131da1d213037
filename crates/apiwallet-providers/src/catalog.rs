//! Provider catalog.
//!
//! Each [`Platform`] maps to one [`ProviderSpec`]: where it lives, how it
//! signs requests, and how its balance and model-list responses map onto
//! the normalized shapes. Adding a provider means adding a `Platform`
//! variant and one arm in [`builtin_spec`]; no query code changes.
//!
//! | provider | signing | remaining | total | used | success rule |
//! |---|---|---|---|---|---|
//! | deepseek | Bearer | `balance_infos.0.total_balance` | same | 0 | `error` absent |
//! | kimi | Bearer | `data.available_balance` | same | 0 | `code == 0` |
//! | siliconflow | Bearer | `data.totalBalance` | same | 0 | `code == 20000` |
//! | zhipu_glm | Bearer | total − used | `data.total_tokens` | `data.used_tokens` | `success == true` |
//! | baidu_qianfan | bce-auth-v1 | `result.remaining_quota` | `result.total_quota` | `result.used_quota` | `error_code` absent |
//! | doubao | scoped HMAC | `Result.AvailableBalance` | same | 0 | `ResponseMetadata.Error` absent |
//! | dashscope, openai, anthropic | | unsupported | | | |

use std::collections::HashMap;

use url::Url;

use apiwallet_vault::Platform;

use crate::error::{ProviderError, Result};
use crate::mapping::{
    BalanceMapping, BalanceMappingSpec, Expected, ListPath, ResetSpec, SuccessSpec,
};
use crate::signer::SigningScheme;
use crate::transport::HttpMethod;

/// `anthropic-version` header value sent with every Anthropic request.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Validity window of bce-auth-v1 signatures, in seconds.
pub const BCE_AUTH_WINDOW_SECS: u32 = 1800;

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// How (or whether) a provider reports its balance.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceEndpoint {
    Query {
        path: &'static str,
        mapping: BalanceMappingSpec,
    },
    Unsupported {
        message: &'static str,
        reference_url: &'static str,
    },
}

/// The provider's model-list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelsEndpoint {
    pub method: HttpMethod,
    pub path: &'static str,
    /// List path to the model ids, e.g. `data[].id`.
    pub ids: &'static str,
}

/// Static description of one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub platform: Platform,
    pub display_name: &'static str,
    pub base_url: &'static str,
    pub signing: SigningScheme,
    pub balance: BalanceEndpoint,
    pub models: ModelsEndpoint,
    pub chat_path: &'static str,
    /// Model used by token checks.
    pub default_model: &'static str,
}

const OPENAI_MODELS: ModelsEndpoint = ModelsEndpoint {
    method: HttpMethod::Get,
    path: "/models",
    ids: "data[].id",
};

/// The built-in description of `platform`.
pub fn builtin_spec(platform: Platform) -> ProviderSpec {
    match platform {
        Platform::Deepseek => ProviderSpec {
            platform,
            display_name: "DeepSeek",
            base_url: "https://api.deepseek.com",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Query {
                path: "/user/balance",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldAbsent("error"),
                    error_message: &["error.message", "message"],
                    remaining: Some("balance_infos.0.total_balance"),
                    total: Some("balance_infos.0.total_balance"),
                    used: None,
                    reset: ResetSpec::Fixed("never (prepaid balance)"),
                    extras: &[
                        ("currency", "balance_infos.0.currency"),
                        ("grantedBalance", "balance_infos.0.granted_balance"),
                        ("toppedUpBalance", "balance_infos.0.topped_up_balance"),
                        ("isAvailable", "is_available"),
                    ],
                    unit: None,
                },
            },
            models: OPENAI_MODELS,
            chat_path: "/chat/completions",
            default_model: "deepseek-chat",
        },
        Platform::Kimi => ProviderSpec {
            platform,
            display_name: "Kimi (Moonshot)",
            base_url: "https://api.moonshot.cn/v1",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Query {
                path: "/users/me/balance",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldEquals("code", Expected::Int(0)),
                    error_message: &["error.message", "message"],
                    remaining: Some("data.available_balance"),
                    total: Some("data.available_balance"),
                    used: None,
                    reset: ResetSpec::Fixed("never (prepaid balance)"),
                    extras: &[
                        ("cashBalance", "data.cash_balance"),
                        ("voucherBalance", "data.voucher_balance"),
                    ],
                    unit: Some("CNY"),
                },
            },
            models: OPENAI_MODELS,
            chat_path: "/chat/completions",
            default_model: "moonshot-v1-8k",
        },
        Platform::Siliconflow => ProviderSpec {
            platform,
            display_name: "SiliconFlow",
            base_url: "https://api.siliconflow.cn/v1",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Query {
                path: "/user/info",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldEquals("code", Expected::Int(20000)),
                    error_message: &["message"],
                    remaining: Some("data.totalBalance"),
                    total: Some("data.totalBalance"),
                    used: None,
                    reset: ResetSpec::Fixed("unknown"),
                    extras: &[
                        ("balance", "data.balance"),
                        ("chargeBalance", "data.chargeBalance"),
                        ("userId", "data.id"),
                    ],
                    unit: Some("CNY"),
                },
            },
            models: OPENAI_MODELS,
            chat_path: "/chat/completions",
            default_model: "Qwen/Qwen2.5-7B-Instruct",
        },
        Platform::ZhipuGlm => ProviderSpec {
            platform,
            display_name: "Zhipu GLM",
            base_url: "https://open.bigmodel.cn",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Query {
                path: "/api/paas/v3/user/balance",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldEquals("success", Expected::Bool(true)),
                    error_message: &["msg", "error.message"],
                    remaining: None,
                    total: Some("data.total_tokens"),
                    used: Some("data.used_tokens"),
                    reset: ResetSpec::Fixed("unknown"),
                    extras: &[],
                    unit: Some("tokens"),
                },
            },
            models: ModelsEndpoint {
                method: HttpMethod::Post,
                path: "/api/paas/v3/model/list",
                ids: "data.models[].model_name",
            },
            chat_path: "/api/paas/v3/chat/completions",
            default_model: "glm-4-air",
        },
        Platform::BaiduQianfan => ProviderSpec {
            platform,
            display_name: "Baidu Qianfan",
            base_url: "https://aip.baidubce.com",
            signing: SigningScheme::BceAuthV1 {
                window_secs: BCE_AUTH_WINDOW_SECS,
            },
            balance: BalanceEndpoint::Query {
                path: "/rpc/2.0/ai_custom/v1/wenxinworkshop/account/quota",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldAbsent("error_code"),
                    error_message: &["error_msg"],
                    remaining: Some("result.remaining_quota"),
                    total: Some("result.total_quota"),
                    used: Some("result.used_quota"),
                    reset: ResetSpec::Field {
                        path: "result.reset_time",
                        fallback: "unknown",
                    },
                    extras: &[],
                    unit: Some("tokens"),
                },
            },
            models: ModelsEndpoint {
                method: HttpMethod::Get,
                path: "/rpc/2.0/ai_custom/v1/wenxinworkshop/models",
                ids: "result[].model_id",
            },
            chat_path: "/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/completions",
            default_model: "ERNIE-3.5-8K",
        },
        Platform::Doubao => ProviderSpec {
            platform,
            display_name: "Doubao",
            base_url: "https://api.doubao.com",
            signing: SigningScheme::ScopedHmac {
                region: "cn-beijing",
                service: "billing",
                key_prefix: "",
            },
            balance: BalanceEndpoint::Query {
                path: "/api/v1/account/balance",
                mapping: BalanceMappingSpec {
                    success: SuccessSpec::FieldAbsent("ResponseMetadata.Error"),
                    error_message: &["ResponseMetadata.Error.Message"],
                    remaining: Some("Result.AvailableBalance"),
                    total: Some("Result.AvailableBalance"),
                    used: None,
                    reset: ResetSpec::Fixed("never (prepaid balance)"),
                    extras: &[
                        ("cashBalance", "Result.CashBalance"),
                        ("creditLimit", "Result.CreditLimit"),
                    ],
                    unit: Some("CNY"),
                },
            },
            models: ModelsEndpoint {
                method: HttpMethod::Get,
                path: "/api/v1/models",
                ids: "models[].id",
            },
            chat_path: "/api/v1/chat/completions",
            default_model: "doubao-lite-128k",
        },
        Platform::Dashscope => ProviderSpec {
            platform,
            display_name: "Alibaba DashScope",
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Unsupported {
                message: "DashScope has no balance API; check the Alibaba Cloud billing console",
                reference_url: "https://billing-cost.console.aliyun.com/home",
            },
            models: OPENAI_MODELS,
            chat_path: "/chat/completions",
            default_model: "qwen-turbo",
        },
        Platform::Openai => ProviderSpec {
            platform,
            display_name: "OpenAI",
            base_url: "https://api.openai.com/v1",
            signing: SigningScheme::Bearer,
            balance: BalanceEndpoint::Unsupported {
                message: "OpenAI has no balance API for API keys; check the usage dashboard",
                reference_url: "https://platform.openai.com/usage",
            },
            models: OPENAI_MODELS,
            chat_path: "/chat/completions",
            default_model: "gpt-4o-mini",
        },
        Platform::Anthropic => ProviderSpec {
            platform,
            display_name: "Anthropic",
            base_url: "https://api.anthropic.com/v1",
            signing: SigningScheme::HeaderKey {
                version: ANTHROPIC_VERSION,
            },
            balance: BalanceEndpoint::Unsupported {
                message: "Anthropic has no balance API; check the console billing page",
                reference_url: "https://console.anthropic.com/settings/billing",
            },
            models: OPENAI_MODELS,
            chat_path: "/messages",
            default_model: "claude-3-haiku-20240307",
        },
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A validated provider: spec plus compiled mappings and parsed base URL.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    spec: ProviderSpec,
    base_url: Url,
    balance_mapping: Option<BalanceMapping>,
    model_ids: ListPath,
}

impl ProviderEntry {
    fn compile(spec: ProviderSpec, base_url: &str) -> Result<Self> {
        let invalid = |reason: String| ProviderError::InvalidMapping {
            provider: spec.platform,
            reason,
        };

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| invalid(format!("base url `{base_url}`: {e}")))?;
        if base_url.host_str().is_none() {
            return Err(invalid(format!("base url `{base_url}` has no host")));
        }

        let balance_mapping = match &spec.balance {
            BalanceEndpoint::Query { mapping, .. } => {
                Some(BalanceMapping::compile(mapping).map_err(invalid)?)
            }
            BalanceEndpoint::Unsupported { .. } => None,
        };
        let model_ids = ListPath::parse(spec.models.ids).map_err(invalid)?;

        Ok(Self {
            spec,
            base_url,
            balance_mapping,
            model_ids,
        })
    }

    pub fn platform(&self) -> Platform {
        self.spec.platform
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The compiled balance mapping, `None` when the provider has no
    /// balance endpoint.
    pub fn balance_mapping(&self) -> Option<&BalanceMapping> {
        self.balance_mapping.as_ref()
    }

    pub fn model_ids(&self) -> &ListPath {
        &self.model_ids
    }

    /// Absolute URL of `path` under the base URL, keeping any base path.
    pub fn url(&self, path: &str) -> Result<Url> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| ProviderError::InvalidMapping {
            provider: self.spec.platform,
            reason: format!("endpoint url `{joined}`: {e}"),
        })
    }
}

/// Every provider the query layer can talk to, validated up front.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    entries: HashMap<Platform, ProviderEntry>,
}

impl ProviderRegistry {
    /// The built-in catalog with default base URLs.
    pub fn builtin() -> Result<Self> {
        Self::with_base_urls(&HashMap::new())
    }

    /// The built-in catalog, with some providers pointed at other base URLs.
    pub fn with_base_urls(overrides: &HashMap<Platform, String>) -> Result<Self> {
        let specs = Platform::ALL.into_iter().map(builtin_spec).collect();
        Self::from_specs(specs, overrides)
    }

    /// Build a registry from explicit specs, validating each.
    pub fn from_specs(
        specs: Vec<ProviderSpec>,
        overrides: &HashMap<Platform, String>,
    ) -> Result<Self> {
        let mut entries = HashMap::with_capacity(specs.len());
        for spec in specs {
            let base_url = overrides
                .get(&spec.platform)
                .map(String::as_str)
                .unwrap_or(spec.base_url)
                .to_string();
            let entry = ProviderEntry::compile(spec, &base_url)?;
            entries.insert(entry.platform(), entry);
        }
        tracing::debug!(providers = entries.len(), "provider registry built");
        Ok(Self { entries })
    }

    /// Look up a provider.
    pub fn get(&self, platform: Platform) -> Result<&ProviderEntry> {
        self.entries
            .get(&platform)
            .ok_or(ProviderError::NotRegistered { provider: platform })
    }

    /// All registered providers in catalog order.
    pub fn entries(&self) -> Vec<&ProviderEntry> {
        let mut entries: Vec<&ProviderEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.platform());
        entries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_validates() {
        let registry = ProviderRegistry::builtin().unwrap();
        assert_eq!(registry.entries().len(), Platform::ALL.len());
    }

    #[test]
    fn hmac_providers_are_the_ones_needing_secrets() {
        let needing: Vec<Platform> = Platform::ALL
            .into_iter()
            .filter(|p| builtin_spec(*p).signing.requires_secret())
            .collect();
        assert_eq!(needing, vec![Platform::BaiduQianfan, Platform::Doubao]);
    }

    #[test]
    fn unsupported_balance_providers() {
        for platform in [Platform::Dashscope, Platform::Openai, Platform::Anthropic] {
            assert!(matches!(
                builtin_spec(platform).balance,
                BalanceEndpoint::Unsupported { .. }
            ));
        }
    }

    #[test]
    fn url_keeps_base_path() {
        let registry = ProviderRegistry::builtin().unwrap();
        let kimi = registry.get(Platform::Kimi).unwrap();
        assert_eq!(
            kimi.url("/users/me/balance").unwrap().as_str(),
            "https://api.moonshot.cn/v1/users/me/balance"
        );
    }

    #[test]
    fn base_url_override() {
        let overrides = HashMap::from([(Platform::Deepseek, "http://127.0.0.1:9000/".to_string())]);
        let registry = ProviderRegistry::with_base_urls(&overrides).unwrap();
        let entry = registry.get(Platform::Deepseek).unwrap();
        assert_eq!(
            entry.url("/user/balance").unwrap().as_str(),
            "http://127.0.0.1:9000/user/balance"
        );
    }

    #[test]
    fn invalid_base_url_rejected() {
        let overrides = HashMap::from([(Platform::Kimi, "not a url".to_string())]);
        let err = ProviderRegistry::with_base_urls(&overrides).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::InvalidMapping {
                provider: Platform::Kimi,
                ..
            }
        ));
    }

    #[test]
    fn invalid_mapping_rejected_at_construction() {
        let mut spec = builtin_spec(Platform::Kimi);
        spec.balance = BalanceEndpoint::Query {
            path: "/x",
            mapping: BalanceMappingSpec {
                success: SuccessSpec::Always,
                error_message: &[],
                remaining: Some("data..broken"),
                total: None,
                used: None,
                reset: ResetSpec::Fixed(""),
                extras: &[],
                unit: None,
            },
        };
        assert!(ProviderRegistry::from_specs(vec![spec], &HashMap::new()).is_err());
    }

    #[test]
    fn missing_provider_not_registered() {
        let registry =
            ProviderRegistry::from_specs(vec![builtin_spec(Platform::Kimi)], &HashMap::new())
                .unwrap();
        assert!(matches!(
            registry.get(Platform::Openai),
            Err(ProviderError::NotRegistered { .. })
        ));
    }
}
