//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apiwallet_providers::{BalanceOutcome, ProviderError, ProviderRegistry, QuotaService};
use apiwallet_store::{KeyValueStore, SqliteStore};
use apiwallet_vault::keys::load_encryption_config;
use apiwallet_vault::{Platform, Vault};
use tracing::{info, warn};

use crate::cli::{CacheAction, Commands};
use crate::config::AppConfig;
use crate::helpers::{availability_line, credential_line, mask_secret, quota_lines};

/// Run one subcommand to completion.
pub async fn dispatch(command: Commands, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Init => cmd_init(config),
        Commands::Providers => cmd_providers(config),
        Commands::Add {
            platform,
            name,
            key,
            secret,
            tags,
        } => cmd_add(config, platform, &name, &key, secret.as_deref(), tags),
        Commands::List => cmd_list(config),
        Commands::Show { id } => cmd_show(config, &id),
        Commands::Remove { id } => cmd_remove(config, &id),
        Commands::Balance { id, refresh } => cmd_balance(config, &id, refresh).await,
        Commands::Models { id, refresh } => cmd_models(config, &id, refresh).await,
        Commands::Check { id } => cmd_check(config, &id).await,
        Commands::Probe { id, model, refresh } => cmd_probe(config, &id, &model, refresh).await,
        Commands::Watch { interval } => cmd_watch(config, Duration::from_secs(interval.max(1))).await,
        Commands::Cache {
            action: CacheAction::Clear,
        } => cmd_cache_clear(config),
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn open_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let db_path = config.db_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open store {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn open_service(config: &AppConfig) -> Result<QuotaService> {
    let store = open_store(config)?;
    let registry = ProviderRegistry::with_base_urls(&config.base_url_overrides()?)
        .context("invalid provider base URL")?;

    QuotaService::builder(store)
        .registry(registry)
        .cache_ttl(config.cache_ttl())
        .http_timeout(config.http_timeout())
        .build()
        .context("failed to open wallet")
}

// ---------------------------------------------------------------------------
// Subcommand: init
// ---------------------------------------------------------------------------

fn cmd_init(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let existed = load_encryption_config(store.as_ref())
        .context("failed to read encryption config")?
        .is_some();
    Vault::open(store).context("failed to initialize vault")?;

    println!();
    if existed {
        println!("  [=] Encryption keys already exist");
    } else {
        println!("  [+] Generated encryption keys");
    }
    println!("  [+] Wallet ready at {}", config.db_path().display());
    println!();
    println!("  Add a key with `apiwallet add --platform <id> --name <name> --key <key>`.");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: providers
// ---------------------------------------------------------------------------

fn cmd_providers(config: &AppConfig) -> Result<()> {
    let registry = ProviderRegistry::with_base_urls(&config.base_url_overrides()?)
        .context("invalid provider base URL")?;

    println!();
    for entry in registry.entries() {
        let spec = entry.spec();
        let mut notes = Vec::new();
        if spec.signing.requires_secret() {
            notes.push("needs --secret");
        }
        if matches!(spec.balance, apiwallet_providers::BalanceEndpoint::Unsupported { .. }) {
            notes.push("no balance API");
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  ({})", notes.join(", "))
        };
        println!(
            "  {:<14} {:<18} {}{}",
            entry.platform().as_str(),
            spec.display_name,
            entry.base_url(),
            notes
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Credential subcommands
// ---------------------------------------------------------------------------

fn cmd_add(
    config: &AppConfig,
    platform: Platform,
    name: &str,
    key: &str,
    secret: Option<&str>,
    tags: Vec<String>,
) -> Result<()> {
    let service = open_service(config)?;
    let needs_secret = service.registry().get(platform)?.spec().signing.requires_secret();
    if needs_secret && secret.is_none_or(str::is_empty) {
        warn!(platform = %platform, "provider signs requests with a secret; queries will fail until one is added");
    }

    let record = service
        .add_credential(platform, name, key, secret, tags)
        .context("failed to store credential")?;
    println!("  [+] Stored {} key {} as {}", platform, mask_secret(key), record.id);
    Ok(())
}

fn cmd_list(config: &AppConfig) -> Result<()> {
    let service = open_service(config)?;
    let records = service.list_credentials()?;
    if records.is_empty() {
        println!("  No keys stored. Add one with `apiwallet add`.");
        return Ok(());
    }
    for record in &records {
        println!("  {}", credential_line(record));
    }
    Ok(())
}

fn cmd_show(config: &AppConfig, id: &str) -> Result<()> {
    let service = open_service(config)?;
    let record = service.get_credential(id)?;

    println!();
    println!("  Id:       {}", record.id);
    println!("  Platform: {}", record.platform);
    println!("  Name:     {}", record.name);
    println!("  Key:      {}", mask_secret(&record.api_key));
    if let Some(secret) = &record.api_secret {
        println!("  Secret:   {}", mask_secret(secret));
    }
    if !record.tags.is_empty() {
        let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
        println!("  Tags:     {}", tags.join(", "));
    }
    println!("  Created:  {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:  {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    match record.status {
        Some(status) => println!("  Status:   {status}"),
        None => println!("  Status:   unchecked"),
    }
    if let Some(quota) = &record.last_balance {
        println!("  Last balance:");
        for line in quota_lines(quota) {
            println!("    {line}");
        }
    }
    println!();
    Ok(())
}

fn cmd_remove(config: &AppConfig, id: &str) -> Result<()> {
    let service = open_service(config)?;
    service.remove_credential(id)?;
    println!("  [-] Removed {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Provider subcommands
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &BalanceOutcome) {
    match outcome {
        BalanceOutcome::Quota(quota) => {
            for line in quota_lines(quota) {
                println!("  {line}");
            }
        }
        BalanceOutcome::Unsupported {
            message,
            reference_url,
        } => {
            println!("  {message}");
            println!("  See {reference_url}");
        }
    }
}

async fn cmd_balance(config: &AppConfig, id: &str, refresh: bool) -> Result<()> {
    let service = open_service(config)?;
    let outcome = service.refresh_balance(id, refresh).await.map_err(explain)?;
    println!();
    print_outcome(&outcome);
    println!();
    Ok(())
}

async fn cmd_models(config: &AppConfig, id: &str, refresh: bool) -> Result<()> {
    let service = open_service(config)?;
    let models = service.list_models(id, refresh).await.map_err(explain)?;
    if models.is_empty() {
        println!("  The provider returned no models.");
    }
    for model in &models {
        println!("  {model}");
    }
    Ok(())
}

async fn cmd_check(config: &AppConfig, id: &str) -> Result<()> {
    let service = open_service(config)?;
    let status = service.check_credential(id).await.map_err(explain)?;
    println!("  {id}: {status}");
    Ok(())
}

async fn cmd_probe(config: &AppConfig, id: &str, model: &str, refresh: bool) -> Result<()> {
    let service = open_service(config)?;
    let availability = service
        .probe_model(id, model, refresh)
        .await
        .map_err(explain)?;
    println!("  {}", availability_line(&availability));
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: watch
// ---------------------------------------------------------------------------

async fn cmd_watch(config: &AppConfig, interval: Duration) -> Result<()> {
    let service = open_service(config)?;
    let sweepers = service.spawn_sweepers(config.sweep_interval());
    info!(interval_secs = interval.as_secs(), "watching balances");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => refresh_all(&service).await?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for sweeper in sweepers {
        sweeper.abort();
    }
    info!("watch stopped");
    Ok(())
}

async fn refresh_all(service: &QuotaService) -> Result<()> {
    let records = service.list_credentials()?;
    println!();
    println!("  {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    for record in records {
        println!("  {} ({}, {})", record.name, record.platform, record.id);
        match service.refresh_balance(&record.id, false).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(err) if err.is_retryable() => {
                warn!(id = %record.id, %err, "balance refresh failed, will retry next round");
                println!("  error: {err}");
            }
            Err(err) => println!("  error: {}", explain(err)),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: cache
// ---------------------------------------------------------------------------

fn cmd_cache_clear(config: &AppConfig) -> Result<()> {
    let service = open_service(config)?;
    service.clear_caches()?;
    println!("  [-] Cleared cached balances, model lists and probes");
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Attach a hint for the errors a user can fix.
fn explain(err: ProviderError) -> anyhow::Error {
    let hint = match &err {
        ProviderError::MissingSecret { .. } => {
            Some("store the key again with --secret; this provider signs every request")
        }
        ProviderError::Vault(e) if e.is_integrity() => {
            Some("the stored keys cannot be decrypted; the encryption config was lost or replaced")
        }
        ProviderError::Transport { .. } => Some("the request may succeed if retried"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwallet_vault::VaultError;

    #[test]
    fn explain_adds_hint_for_missing_secret() {
        let err = explain(ProviderError::MissingSecret {
            provider: Platform::Doubao,
        });
        let text = format!("{err:#}");
        assert!(text.contains("--secret"));
        assert!(text.contains("doubao"));
    }

    #[test]
    fn explain_leaves_rejections_alone() {
        let err = explain(ProviderError::ProviderRejected {
            provider: Platform::Kimi,
            message: "quota exhausted".into(),
        });
        assert_eq!(err.to_string(), "provider kimi rejected the request: quota exhausted");
    }

    #[test]
    fn explain_flags_integrity_errors() {
        let err = explain(ProviderError::Vault(VaultError::DecryptionFailure {
            reason: "bad padding".into(),
        }));
        assert!(err.to_string().contains("cannot be decrypted"));
    }

    #[test]
    fn service_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().join("nested").join("data");

        cmd_init(&config).unwrap();
        cmd_add(&config, Platform::Openai, "main", "sk-abcdefghijkl", None, vec![]).unwrap();

        let service = open_service(&config).unwrap();
        let records = service.list_credentials().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].platform, Platform::Openai);

        cmd_remove(&config, &records[0].id).unwrap();
        assert!(service.list_credentials().unwrap().is_empty());
    }
}
