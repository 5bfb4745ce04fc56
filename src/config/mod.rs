//! Configuration management for the oracle relay
//!
//! Loads from optional YAML/TOML files + environment variables via .env

use anyhow::{bail, Context, Result};
use chrono::Duration;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use crate::gateway::GatewayConfig;
use crate::oracle::{CandidatePolicy, ConsensusRule, RelayPolicy};
use crate::types::{AssetId, SourceId};

/// Environment variable holding the oracle signing key
pub const PRIVATE_KEY_ENV: &str = "ORACLE_PRIVATE_KEY";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub keeper: KeeperConfig,
    pub chain: ChainConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Price tick interval in milliseconds
    pub price_interval_ms: u64,
    /// Match finality sweep interval in milliseconds
    pub match_interval_ms: u64,
    /// Challenge window a candidate must stay stable for
    pub challenge_ms: u64,
    /// Cross-source and candidate divergence tolerance (0.05 = 5%)
    pub diff_pct: f64,
    /// Max change from the last confirmed price (0.5 = 50%)
    pub max_swing_pct: f64,
    /// VWAP look-back window in seconds
    pub sample_window_secs: u64,
    /// Independent sources sampled per asset
    pub sources: Vec<String>,
    /// Sources that must report; 0 means all of them
    pub quorum: usize,
    /// Assets evaluated even without recent rows
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub adapter_address: Option<String>,
    pub betting_router_address: Option<String>,
    pub option_pool_address: Option<String>,
    pub chain_id: u64,
    /// Receipt wait before a submission counts as failed
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root of the CSV market store
    pub data_dir: String,
    /// Relay state snapshot path
    pub state_file: String,
    /// Persist candidate / relayed state across restarts
    pub persist_state: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE_RELAY__*)
            .add_source(
                Environment::with_prefix("ORACLE_RELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("relay.sources")
                    .with_list_parse_key("relay.assets")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.relay_policy()?;
        Ok(app_config)
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            // Relay defaults
            .set_default("relay.price_interval_ms", 120_000)?
            .set_default("relay.match_interval_ms", 120_000)?
            .set_default("relay.challenge_ms", 120_000)?
            .set_default("relay.diff_pct", 0.05)?
            .set_default("relay.max_swing_pct", 0.5)?
            .set_default("relay.sample_window_secs", 3600)?
            .set_default("relay.sources", vec!["buff163", "steam"])?
            .set_default("relay.quorum", 0)?
            .set_default("relay.assets", Vec::<String>::new())?
            // Keeper defaults
            .set_default("keeper.enabled", true)?
            .set_default("keeper.interval_ms", 30_000)?
            // Chain defaults
            .set_default("chain.chain_id", 137)?
            .set_default("chain.confirm_timeout_secs", 180)?
            // Store defaults
            .set_default("store.data_dir", "./data")?
            .set_default("store.state_file", "./data/relay_state.json")?
            .set_default("store.persist_state", true)?
            // Logging defaults
            .set_default("logging.json", false)?;
        Ok(builder)
    }

    /// Validated numeric policy for the price relay
    pub fn relay_policy(&self) -> Result<RelayPolicy> {
        let relay = &self.relay;
        let diff = pct_to_decimal("relay.diff_pct", relay.diff_pct)?;
        let swing = pct_to_decimal("relay.max_swing_pct", relay.max_swing_pct)?;

        let sources: Vec<SourceId> = relay
            .sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(SourceId::new)
            .collect();
        if sources.is_empty() {
            bail!("relay.sources must name at least one source");
        }
        if relay.quorum > sources.len() {
            bail!(
                "relay.quorum ({}) exceeds the number of sources ({})",
                relay.quorum,
                sources.len()
            );
        }
        let quorum = if relay.quorum == 0 {
            sources.len()
        } else {
            relay.quorum
        };

        if relay.challenge_ms == 0 {
            bail!("relay.challenge_ms must be positive");
        }
        if relay.sample_window_secs == 0 {
            bail!("relay.sample_window_secs must be positive");
        }
        let challenge_ms = i64::try_from(relay.challenge_ms).context("relay.challenge_ms too large")?;
        let window_secs =
            i64::try_from(relay.sample_window_secs).context("relay.sample_window_secs too large")?;

        Ok(RelayPolicy {
            sources,
            consensus: ConsensusRule::new(diff, quorum),
            candidate: CandidatePolicy {
                divergence_tolerance: diff,
                challenge_window: Duration::milliseconds(challenge_ms),
                max_swing: swing,
            },
            sample_window: Duration::seconds(window_secs),
            extra_assets: relay
                .assets
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(AssetId::new)
                .collect(),
        })
    }

    pub fn price_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.relay.price_interval_ms.max(1))
    }

    pub fn match_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.relay.match_interval_ms.max(1))
    }

    pub fn keeper_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.keeper.interval_ms.max(1))
    }

    /// Gateway settings, with the signing key read from the environment
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            rpc_url: self.chain.rpc_url.clone(),
            private_key: std::env::var(PRIVATE_KEY_ENV).ok(),
            adapter_address: self.chain.adapter_address.clone(),
            betting_router_address: self.chain.betting_router_address.clone(),
            option_pool_address: self.chain.option_pool_address.clone(),
            chain_id: self.chain.chain_id,
            confirm_timeout: StdDuration::from_secs(self.chain.confirm_timeout_secs.max(1)),
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "sources={:?} diff={} swing={} challenge_ms={} price_every_ms={} match_every_ms={} rpc={} adapter={} router={} pool={}",
            self.relay.sources,
            self.relay.diff_pct,
            self.relay.max_swing_pct,
            self.relay.challenge_ms,
            self.relay.price_interval_ms,
            self.relay.match_interval_ms,
            self.chain.rpc_url.is_some(),
            self.chain.adapter_address.is_some(),
            self.chain.betting_router_address.is_some(),
            self.chain.option_pool_address.is_some(),
        )
    }
}

fn pct_to_decimal(key: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() || value < 0.0 {
        bail!("{} must be a non-negative number, got {}", key, value);
    }
    // f64 Display is the shortest round-trip form, so 0.05 stays 0.05
    Decimal::from_str(&value.to_string())
        .with_context(|| format!("{} is not representable: {}", key, value))
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
