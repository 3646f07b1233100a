// Scanner service configuration
// Optional TOML file layered under SCANNER__* environment variables

use crate::reporting::ReportConfig;
use crate::universe::{MarketFilter, UniverseRefreshConfig};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use risk_control::DetectorConfig;
use serde::{Deserialize, Serialize};
use signal_generation::{PipelineConfig, TrendRule};
use std::path::Path;

/// File looked up when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "signal-scanner.toml";

/// Environment variable prefix, e.g. `SCANNER__TICK_INTERVAL_SECS=60`
pub const ENV_PREFIX: &str = "SCANNER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    data_ingestion::RestKlineConnector::DEFAULT_BASE_URL.to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Webhook receiving `{"text": ..}` posts; alerts go to the log when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_alert_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_alert_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Symbols scanned; the seed list when the universe refresh is enabled
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    #[serde(default)]
    pub universe_refresh: UniverseRefreshConfig,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single candle fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// PostgreSQL connection string; in-memory stores when absent
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reports: ReportConfig,
}

fn default_universe() -> Vec<String> {
    ["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tick_interval_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            universe_refresh: UniverseRefreshConfig::default(),
            tick_interval_secs: default_tick_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            database_url: None,
            exchange: ExchangeConfig::default(),
            pipeline: PipelineConfig::default(),
            detector: DetectorConfig::default(),
            alerts: AlertsConfig::default(),
            logging: LoggingConfig::default(),
            reports: ReportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (required) or the default file (optional), then
    /// apply environment overrides and validate. Runs before logging is
    /// initialised, so it does not log.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(Path::new(p)).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        Self::from_builder(Config::builder().add_source(file))
    }

    /// Parse a TOML document, then apply environment overrides
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Self::from_builder(Config::builder().add_source(File::from_str(contents, config::FileFormat::Toml)))
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("universe")
                    .with_list_parse_key("pipeline.context_timeframes")
                    .with_list_parse_key("universe_refresh.filters.exclude_patterns")
                    .with_list_parse_key("universe_refresh.filters.exclude_symbols"),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.universe.is_empty() {
            anyhow::bail!("universe must contain at least one symbol");
        }
        if self.universe.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("universe contains an empty symbol");
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }

        let pipeline = &self.pipeline;
        for tf in pipeline.timeframes() {
            if !common::is_known_timeframe(&tf) {
                anyhow::bail!("unknown pipeline timeframe {:?}", tf);
            }
        }
        if pipeline.candle_limit < 2 {
            anyhow::bail!("pipeline.candle_limit must be at least 2, got {}", pipeline.candle_limit);
        }
        if pipeline.max_concurrent_symbols == 0 {
            anyhow::bail!("pipeline.max_concurrent_symbols must be positive");
        }
        if pipeline.confluence.hard_block_penalty > 0.0 || pipeline.confluence.soft_penalty > 0.0 {
            anyhow::bail!("confluence penalties must be zero or negative");
        }
        check_trend_rule("pipeline.entry_trend", &pipeline.entry_trend)?;
        check_trend_rule("pipeline.context_trend", &pipeline.context_trend)?;

        let refresh = &self.universe_refresh;
        if refresh.enabled {
            if refresh.interval_secs == 0 {
                anyhow::bail!("universe_refresh.interval_secs must be positive");
            }
            if refresh.max_attempts == 0 {
                anyhow::bail!("universe_refresh.max_attempts must be positive");
            }
        }
        MarketFilter::new(refresh.filters.clone()).context("Invalid universe_refresh.filters")?;

        if self.reports.enabled && self.reports.interval_secs == 0 {
            anyhow::bail!("reports.interval_secs must be positive");
        }

        self.detector.validate().context("Invalid detector configuration")?;
        Ok(())
    }
}

fn check_trend_rule(name: &str, rule: &TrendRule) -> Result<()> {
    if rule.fast_ema == 0 || rule.fast_ema >= rule.slow_ema {
        anyhow::bail!(
            "{} needs 0 < fast_ema < slow_ema, got {} / {}",
            name,
            rule.fast_ema,
            rule.slow_ema
        );
    }
    Ok(())
}
