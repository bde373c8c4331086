//! TOML configuration.
//!
//! One file configures both halves of the system: the catalog service
//! (`[db]`, `[server]`, `[provider]`, `[search]`) and the operator tools
//! that drive its admin endpoints (`[client]`, `[seed]`, `[monitor]`).
//! The shared admin token lives in `[admin]`.
//!
//! Two environment variables override the file so secrets can stay out of it:
//! `MIGRATION_TOKEN` replaces `admin.token` and `DATERIUM_USER_ID` replaces
//! `provider.user_id`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdminConfig {
    /// Shared secret passed as `?token=` on every admin call. Empty disables
    /// the admin API on the server side.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    /// Terms used by `seed_basic` when the request names none.
    #[serde(default = "default_queries")]
    pub default_queries: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            user_id: String::new(),
            timeout_secs: default_provider_timeout_secs(),
            default_queries: default_queries(),
        }
    }
}

fn default_provider_base_url() -> String {
    "https://api.dateriumsystem.com".to_string()
}
fn default_provider_timeout_secs() -> u64 {
    45
}
fn default_queries() -> Vec<String> {
    [
        "tivoly",
        "broca",
        "punta",
        "atornillado",
        "anclaje",
        "disco",
        "llave",
        "sierra",
        "adhesivo",
        "tornillo",
        "tuerca",
        "arandela",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: i64,
    #[serde(default = "default_search_max_limit")]
    pub max_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_search_max_limit(),
        }
    }
}

fn default_search_limit() -> i64 {
    30
}
fn default_search_max_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the catalog service the operator tools talk to.
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

fn default_client_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_client_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    #[serde(default = "default_cursor_path")]
    pub cursor_path: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_batch_delay_secs")]
    pub batch_delay_secs: u64,
    /// Ordered batch descriptors, each a comma-separated list of terms.
    #[serde(default)]
    pub batches: Vec<String>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            cursor_path: default_cursor_path(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            batch_delay_secs: default_batch_delay_secs(),
            batches: Vec::new(),
        }
    }
}

impl SeedConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("./data/seed_cursor.txt")
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_batch_delay_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_monitor_interval_secs() -> u64 {
    20
}
fn default_recent_limit() -> u32 {
    5
}

impl Config {
    /// A configuration with every optional section at its default, used by
    /// the operator tools when no config file is present.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/catalog.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            admin: AdminConfig::default(),
            provider: ProviderConfig::default(),
            search: SearchConfig::default(),
            client: ClientConfig::default(),
            seed: SeedConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }

    /// Applies `MIGRATION_TOKEN` and `DATERIUM_USER_ID` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("MIGRATION_TOKEN") {
            if !token.trim().is_empty() {
                self.admin.token = token.trim().to_string();
            }
        }
        if let Ok(user_id) = std::env::var("DATERIUM_USER_ID") {
            if !user_id.trim().is_empty() {
                self.provider.user_id = user_id.trim().to_string();
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Parses and validates a configuration document without touching the
/// environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.seed.max_attempts == 0 {
        anyhow::bail!("seed.max_attempts must be >= 1");
    }

    if config.search.max_limit < 1 {
        anyhow::bail!("search.max_limit must be >= 1");
    }
    if config.search.default_limit < 1 || config.search.default_limit > config.search.max_limit {
        anyhow::bail!("search.default_limit must be in [1, search.max_limit]");
    }

    if config.monitor.recent_limit == 0 || config.monitor.recent_limit > 200 {
        anyhow::bail!("monitor.recent_limit must be in [1, 200]");
    }

    for (i, batch) in config.seed.batches.iter().enumerate() {
        if crate::terms::split_batch(batch).is_empty() {
            anyhow::bail!("seed.batches[{}] has no search terms", i);
        }
    }

    if !config.client.base_url.starts_with("http://")
        && !config.client.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "client.base_url must be an http(s) URL, got '{}'",
            config.client.base_url
        );
    }

    Ok(())
}
