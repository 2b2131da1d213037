//! CLI argument definitions for apiwallet.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use apiwallet_vault::Platform;
use clap::{Parser, Subcommand};

/// apiwallet -- one wallet for your LLM provider API keys.
#[derive(Parser)]
#[command(
    name = "apiwallet",
    version,
    about = "apiwallet -- encrypted LLM API key wallet with balance and model checks",
    long_about = "Stores provider API keys encrypted on disk, queries each provider's \
                  balance in one normalized shape, lists models and probes their availability."
)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and encryption keys.
    Init,

    /// List supported providers.
    Providers,

    /// Store a new API key.
    Add {
        /// Provider id, e.g. `deepseek` or `baidu_qianfan`.
        #[arg(long, short)]
        platform: Platform,
        /// A name to recognize the key by.
        #[arg(long, short)]
        name: String,
        /// The API key (access key for HMAC-signed providers).
        #[arg(long, short)]
        key: String,
        /// The secret key, required by baidu_qianfan and doubao.
        #[arg(long, short)]
        secret: Option<String>,
        /// Tags; repeat for several.
        #[arg(long = "tag", short)]
        tags: Vec<String>,
    },

    /// List stored keys.
    List,

    /// Show one stored key.
    Show {
        /// The credential id.
        id: String,
    },

    /// Delete a stored key and its cached results.
    Remove {
        /// The credential id.
        id: String,
    },

    /// Query a key's balance.
    Balance {
        /// The credential id.
        id: String,
        /// Ignore any cached result.
        #[arg(long, short)]
        refresh: bool,
    },

    /// List the models a key can use.
    Models {
        /// The credential id.
        id: String,
        /// Ignore any cached result.
        #[arg(long, short)]
        refresh: bool,
    },

    /// Check whether the provider accepts a key.
    Check {
        /// The credential id.
        id: String,
    },

    /// Send a one-token request to a model and time it.
    Probe {
        /// The credential id.
        id: String,
        /// The model to probe.
        model: String,
        /// Ignore any cached result.
        #[arg(long, short)]
        refresh: bool,
    },

    /// Refresh every key's balance on an interval until interrupted.
    Watch {
        /// Seconds between refresh rounds.
        #[arg(long, short, default_value_t = 300)]
        interval: u64,
    },

    /// Manage cached results.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Actions on the result caches.
#[derive(Subcommand)]
pub enum CacheAction {
    /// Drop every cached balance, model list and probe.
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn add_parses_platform_and_repeated_tags() {
        let cli = Cli::try_parse_from([
            "apiwallet",
            "add",
            "--platform",
            "baidu_qianfan",
            "--name",
            "work",
            "--key",
            "ak",
            "--secret",
            "sk",
            "--tag",
            "prod",
            "--tag",
            "cn",
        ])
        .unwrap();

        match cli.command {
            Commands::Add {
                platform,
                secret,
                tags,
                ..
            } => {
                assert_eq!(platform, Platform::BaiduQianfan);
                assert_eq!(secret.as_deref(), Some("sk"));
                assert_eq!(tags, vec!["prod", "cn"]);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let result = Cli::try_parse_from([
            "apiwallet", "add", "--platform", "nope", "--name", "n", "--key", "k",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_config_flag() {
        let cli =
            Cli::try_parse_from(["apiwallet", "balance", "abc", "--refresh", "--config", "x.toml"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Balance { refresh: true, .. }));
    }
}
