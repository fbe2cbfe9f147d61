//! Configuration management for the pricing oracle
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::{default_specs, MovingAverageSpec};
use crate::oracle::sources::{ChainlinkSource, CoinGeckoSource, QuoteSource};
use crate::oracle::{TickerSource, MAX_DECIMALS};
use crate::server::RecordVersion;
use crate::types::Ticker;

/// Env var holding a hex private key; wins over `signing.key_path`
pub const SIGNING_KEY_ENV: &str = "SIGNING_KEY";

/// Upper bound for either deviation ratio
pub const MAX_DEVIATION_RATIO: Decimal = Decimal::ONE_HUNDRED;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub sanity: SanityConfig,
    /// Bound to MA1..MA3 in order
    #[serde(default = "default_specs")]
    pub moving_averages: Vec<MovingAverageSpec>,
    pub server: ServerConfig,
    pub persistence: PersistenceConfig,
    pub signing: SigningConfig,
    pub rpc: RpcConfig,
    pub coingecko: CoinGeckoConfig,
    #[serde(default = "default_tickers")]
    pub tickers: Vec<TickerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Primary,
    Secondary,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE__*)
            .add_source(Environment::with_prefix("ORACLE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Builder pre-populated with built-in defaults
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Oracle defaults
            .set_default("oracle.poll_interval_secs", 30)?
            .set_default("oracle.source_timeout_ms", 5000)?
            .set_default("oracle.base_ticker", "xUSD")?
            .set_default("oracle.granularity", 10_000)?
            // Sanity defaults (no secondary sources out of the box)
            .set_default("sanity.enabled", false)?
            .set_default("sanity.max_increase_ratio", "1.15")?
            .set_default("sanity.max_decrease_ratio", "0.85")?
            .set_default("sanity.missing_secondary", "zero")?
            // Server defaults
            .set_default("server.bind_addr", "0.0.0.0:8080")?
            .set_default("server.staleness_tolerance_secs", 10)?
            .set_default("server.default_version", 2)?
            // Persistence defaults
            .set_default("persistence.database_url", "sqlite:./data/oracle.db")?
            .set_default("persistence.max_connections", 4)?
            // Signing defaults
            .set_default("signing.key_path", "certs/ec_private.pem")?
            // Source defaults
            .set_default("rpc.url", "http://localhost:8545")?
            .set_default("coingecko.base_url", crate::oracle::sources::COINGECKO_API_URL)?
            .set_default("coingecko.coin_id", "haven")?
            .set_default("coingecko.cache_ttl_secs", 5)?;
        Ok(builder)
    }

    /// Reject configurations the oracle cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.oracle.poll_interval_secs == 0 {
            bail!("oracle.poll_interval_secs must be positive");
        }
        if self.oracle.granularity == 0 {
            bail!("oracle.granularity must be positive");
        }
        if self.tickers.is_empty() {
            bail!("No tickers configured");
        }

        let mut seen = HashSet::new();
        for entry in &self.tickers {
            if !seen.insert(entry.ticker) {
                bail!("Ticker {} configured more than once", entry.ticker);
            }
            self.validate_source(entry.ticker, &entry.primary)?;
            if let Some(secondary) = &entry.secondary {
                self.validate_source(entry.ticker, secondary)?;
            }
        }

        let base = self.oracle.base_ticker;
        let base_entry = self
            .tickers
            .iter()
            .find(|t| t.ticker == base)
            .with_context(|| format!("Base ticker {} has no configured source", base))?;

        if self.moving_averages.len() > 3 {
            bail!(
                "At most three moving averages are supported, got {}",
                self.moving_averages.len()
            );
        }
        if self.moving_averages.iter().any(|ma| ma.window.rows() == 0) {
            bail!("Moving average windows need at least one row");
        }

        if self.sanity.enabled {
            if base_entry.secondary.is_none() {
                bail!(
                    "Sanity check enabled but base ticker {} has no secondary source",
                    base
                );
            }
            if self.sanity.max_decrease_ratio <= Decimal::ZERO
                || self.sanity.max_increase_ratio < self.sanity.max_decrease_ratio
                || self.sanity.max_increase_ratio > MAX_DEVIATION_RATIO
            {
                bail!(
                    "Invalid deviation band {} .. {}",
                    self.sanity.max_decrease_ratio,
                    self.sanity.max_increase_ratio
                );
            }
        }

        RecordVersion::try_from(self.server.default_version)
            .context("Invalid server.default_version")?;

        Ok(())
    }

    fn validate_source(&self, ticker: Ticker, source: &SourceDescriptor) -> Result<()> {
        if source.decimals > MAX_DECIMALS {
            bail!(
                "{}: decimals {} exceeds {}",
                ticker,
                source.decimals,
                MAX_DECIMALS
            );
        }
        match source.kind {
            SourceKind::Chainlink => {
                let address = source
                    .address
                    .as_deref()
                    .with_context(|| format!("{}: chainlink source needs an address", ticker))?;
                Address::from_str(address)
                    .with_context(|| format!("{}: invalid feed address {}", ticker, address))?;
            }
            SourceKind::Coingecko => {
                if source.vs_currency.as_deref().unwrap_or("").is_empty() {
                    bail!("{}: coingecko source needs a vs_currency", ticker);
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.oracle.poll_interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle.source_timeout_ms)
    }

    /// Whether any ticker has a secondary source
    pub fn has_secondary_sources(&self) -> bool {
        self.tickers.iter().any(|t| t.secondary.is_some())
    }

    /// Build the quote sources for one role, in configuration order.
    /// Tickers of the same kind share one client.
    pub fn ticker_sources(&self, role: SourceRole) -> Result<Vec<TickerSource>> {
        let entries: Vec<(Ticker, &SourceDescriptor)> = self
            .tickers
            .iter()
            .filter_map(|t| match role {
                SourceRole::Primary => Some((t.ticker, &t.primary)),
                SourceRole::Secondary => t.secondary.as_ref().map(|s| (t.ticker, s)),
            })
            .collect();

        let mut feeds = HashMap::new();
        let mut currencies = HashMap::new();
        for (ticker, source) in &entries {
            match source.kind {
                SourceKind::Chainlink => {
                    let address = source.address.as_deref().unwrap_or_default();
                    let address = Address::from_str(address)
                        .with_context(|| format!("{}: invalid feed address {}", ticker, address))?;
                    feeds.insert(*ticker, address);
                }
                SourceKind::Coingecko => {
                    let currency = source.vs_currency.clone().unwrap_or_default();
                    currencies.insert(*ticker, currency);
                }
            }
        }

        let chainlink: Option<Arc<dyn QuoteSource>> = if feeds.is_empty() {
            None
        } else {
            Some(Arc::new(ChainlinkSource::new(&self.rpc.url, feeds)?))
        };
        let coingecko: Option<Arc<dyn QuoteSource>> = if currencies.is_empty() {
            None
        } else {
            Some(Arc::new(CoinGeckoSource::new(
                &self.coingecko.base_url,
                &self.coingecko.coin_id,
                currencies,
                self.source_timeout(),
                Duration::from_secs(self.coingecko.cache_ttl_secs),
            )?))
        };

        entries
            .into_iter()
            .map(|(ticker, source)| {
                let client = match source.kind {
                    SourceKind::Chainlink => chainlink.clone(),
                    SourceKind::Coingecko => coingecko.clone(),
                }
                .with_context(|| format!("No {} client for {}", source.kind.label(), ticker))?;

                Ok(TickerSource {
                    ticker,
                    label: source.kind.label().to_string(),
                    source: client,
                    style: source.style,
                    decimals: source.decimals,
                })
            })
            .collect()
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let secondaries = self.tickers.iter().filter(|t| t.secondary.is_some()).count();
        format!(
            "poll={}s timeout={}ms base={} granularity={} tickers={} secondaries={} sanity={} averages={} bind={} db={}",
            self.oracle.poll_interval_secs,
            self.oracle.source_timeout_ms,
            self.oracle.base_ticker,
            self.oracle.granularity,
            self.tickers.len(),
            secondaries,
            self.sanity.enabled,
            self.moving_averages.len(),
            self.server.bind_addr,
            self.persistence.database_url
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AverageWindow;
    use crate::oracle::{MissingSecondaryAction, QuoteStyle};
    use config::FileFormat;
    use rust_decimal_macros::dec;

    fn from_yaml(yaml: &str) -> AppConfig {
        AppConfig::defaults()
            .unwrap()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn built_in_defaults_are_valid() {
        let config = from_yaml("{}");
        config.validate().unwrap();

        assert_eq!(config.oracle.poll_interval_secs, 30);
        assert_eq!(config.oracle.base_ticker, Ticker::XUSD);
        assert_eq!(config.oracle.granularity, 10_000);
        assert_eq!(config.sanity.max_increase_ratio, dec!(1.15));
        assert_eq!(config.sanity.missing_secondary, MissingSecondaryAction::Zero);
        assert_eq!(config.tickers.len(), Ticker::COUNT);
        assert_eq!(config.moving_averages.len(), 3);
        assert_eq!(
            config.moving_averages[2].window,
            AverageWindow::LastNonZero { rows: 2160 }
        );
    }

    #[test]
    fn parses_ticker_table_and_averages() {
        let config = from_yaml(
            r#"
sanity:
  enabled: true
moving_averages:
  - ticker: xUSD
    window:
      kind: trailing
      rows: 120
      max_age_secs: 3600
tickers:
  - ticker: xUSD
    primary:
      kind: coingecko
      vs_currency: usd
    secondary:
      kind: chainlink
      address: "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"
      style: inverse
      decimals: 8
"#,
        );
        config.validate().unwrap();

        let usd = &config.tickers[0];
        assert_eq!(usd.primary.kind, SourceKind::Coingecko);
        let secondary = usd.secondary.as_ref().unwrap();
        assert_eq!(secondary.style, QuoteStyle::Inverse);
        assert_eq!(secondary.decimals, 8);
        assert_eq!(
            config.moving_averages,
            vec![MovingAverageSpec::trailing(Ticker::XUSD, 120, 3600)]
        );
        assert!(config.has_secondary_sources());
    }

    #[test]
    fn rejects_duplicate_tickers() {
        let config = from_yaml(
            r#"
tickers:
  - ticker: xUSD
    primary: { kind: coingecko, vs_currency: usd }
  - ticker: xUSD
    primary: { kind: coingecko, vs_currency: usd }
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_missing_base_ticker() {
        let config = from_yaml(
            r#"
tickers:
  - ticker: xEUR
    primary: { kind: coingecko, vs_currency: eur }
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Base ticker xUSD"));
    }

    #[test]
    fn rejects_more_than_three_averages() {
        let mut config = from_yaml("{}");
        config
            .moving_averages
            .push(MovingAverageSpec::last_non_zero(Ticker::XUSD, 10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_sanity_without_base_secondary() {
        let mut config = from_yaml("{}");
        config.sanity.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no secondary source"));
    }

    #[test]
    fn rejects_unbounded_deviation_ratio() {
        let mut config = from_yaml(
            r#"
tickers:
  - ticker: xUSD
    primary: { kind: coingecko, vs_currency: usd }
    secondary: { kind: coingecko, vs_currency: usd }
"#,
        );
        config.sanity.enabled = true;
        config.validate().unwrap();

        config.sanity.max_increase_ratio = dec!(10_000_000_000);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid deviation band"));

        config.sanity.max_increase_ratio = MAX_DEVIATION_RATIO;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_feed_address_and_version() {
        let mut config = from_yaml("{}");
        config.tickers[0].primary = SourceDescriptor::chainlink("0xnothex", QuoteStyle::Direct, 8);
        assert!(config.validate().is_err());

        let mut config = from_yaml("{}");
        config.server.default_version = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_sources_per_role() {
        let config = from_yaml("{}");
        let primary = config.ticker_sources(SourceRole::Primary).unwrap();
        assert_eq!(primary.len(), Ticker::COUNT);
        assert!(primary.iter().all(|s| s.label == "coingecko"));
        assert!(config.ticker_sources(SourceRole::Secondary).unwrap().is_empty());
    }

    #[test]
    fn digest_omits_key_material() {
        let config = from_yaml("{}");
        let digest = config.digest();
        assert!(digest.contains("base=xUSD"));
        assert!(!digest.contains("pem"));
    }
}
