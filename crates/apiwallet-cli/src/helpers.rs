//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, environment variable utilities and
//! the formatting of credentials and quotas for terminal output.

use apiwallet_providers::ModelAvailability;
use apiwallet_vault::{CredentialRecord, NormalizedQuota};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Read a non-empty environment variable, returning `None` if unset or empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Show only the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// One-line summary of a credential for listings.
pub fn credential_line(record: &CredentialRecord) -> String {
    let status = record
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unchecked".into());
    let tags = if record.tags.is_empty() {
        String::new()
    } else {
        let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
        format!("  [{}]", tags.join(", "))
    };
    format!(
        "{}  {:<14} {:<20} {}  {}{}",
        record.id,
        record.platform.as_str(),
        record.name,
        mask_secret(&record.api_key),
        status,
        tags
    )
}

/// Multi-line rendering of a quota.
pub fn quota_lines(quota: &NormalizedQuota) -> Vec<String> {
    let unit = quota
        .provider_extras()
        .get("unit")
        .and_then(|v| v.as_str())
        .map(|u| format!(" {u}"))
        .unwrap_or_default();

    let mut lines = vec![
        format!("Remaining:  {:.2}{unit}", quota.remaining_tokens()),
        format!("Total:      {:.2}{unit}", quota.total_tokens()),
        format!("Used:       {:.2}{unit}", quota.used_tokens()),
        format!("Used ratio: {:.1}%", quota.used_ratio() * 100.0),
        format!("Resets:     {}", quota.reset_description()),
    ];
    for (name, value) in quota.provider_extras() {
        if name == "unit" {
            continue;
        }
        let value = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        lines.push(format!("  {name}: {value}"));
    }
    lines
}

/// One-line summary of a probe.
pub fn availability_line(availability: &ModelAvailability) -> String {
    format!(
        "{} ({}): {} in {} ms, checked {}",
        availability.model_id,
        availability.platform,
        availability.status,
        availability.latency_ms,
        availability.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwallet_vault::{CredentialStatus, Platform};
    use chrono::Utc;
    use serde_json::{Map, json};

    #[test]
    fn mask_secret_keeps_edges() {
        assert_eq!(mask_secret("sk-1234567890abcdef"), "sk-1****cdef");
    }

    #[test]
    fn mask_secret_hides_short_values_entirely() {
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("12345678"), "********");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn mask_secret_is_char_safe() {
        assert_eq!(mask_secret("密钥密钥密钥密钥密钥"), "密钥密钥****密钥密钥");
    }

    #[test]
    fn credential_line_masks_key() {
        let mut record = CredentialRecord::new(Platform::Kimi, "main", "sk-abcdefghijkl", Utc::now())
            .with_tags(["prod"]);
        record.status = Some(CredentialStatus::Valid);
        let line = credential_line(&record);
        assert!(line.contains("sk-a****ijkl"));
        assert!(!line.contains("sk-abcdefghijkl"));
        assert!(line.contains("valid"));
        assert!(line.contains("[prod]"));
    }

    #[test]
    fn quota_lines_include_unit_and_extras() {
        let mut extras = Map::new();
        extras.insert("unit".into(), json!("CNY"));
        extras.insert("cashBalance".into(), json!("40"));
        let quota = NormalizedQuota::new(60.0, 100.0, 40.0, "never", extras);

        let lines = quota_lines(&quota);
        assert_eq!(lines[0], "Remaining:  60.00 CNY");
        assert_eq!(lines[3], "Used ratio: 40.0%");
        assert!(lines.iter().any(|l| l == "  cashBalance: 40"));
        assert!(!lines.iter().any(|l| l.contains("unit:")));
    }
}
