//! Anomaly detector configuration

use serde::{Deserialize, Serialize};

/// Two-tier threshold. Values strictly above a tier reach it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn is_ordered(&self) -> bool {
        self.warning >= 0.0 && self.warning < self.critical
    }
}

/// Overall detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Market bellwether the universe is compared against
    #[serde(default = "default_reference_symbol")]
    pub reference_symbol: String,

    /// Timeframe the checks run on
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Moves within +/- this fraction count as no direction
    #[serde(default = "default_direction_dead_zone")]
    pub direction_dead_zone: f64,

    /// Rolling correlation window (periods)
    #[serde(default = "default_correlation_window")]
    pub correlation_window: usize,

    /// Absolute one-bar move of the reference asset (fraction)
    #[serde(default = "default_shock_thresholds")]
    pub shock: Thresholds,

    /// Share of directional symbols moving against the reference trend
    #[serde(default = "default_breadth_thresholds")]
    pub breadth: Thresholds,

    /// Absolute change in rolling correlation with the reference
    #[serde(default = "default_correlation_thresholds")]
    pub correlation: Thresholds,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            reference_symbol: default_reference_symbol(),
            timeframe: default_timeframe(),
            shock: default_shock_thresholds(),
            breadth: default_breadth_thresholds(),
            direction_dead_zone: default_direction_dead_zone(),
            correlation: default_correlation_thresholds(),
            correlation_window: default_correlation_window(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, t) in [
            ("shock", self.shock),
            ("breadth", self.breadth),
            ("correlation", self.correlation),
        ] {
            if !t.is_ordered() {
                anyhow::bail!(
                    "{} thresholds must satisfy 0 <= warning < critical (got {} / {})",
                    name,
                    t.warning,
                    t.critical
                );
            }
        }

        if self.correlation_window < 3 {
            anyhow::bail!("correlation_window must be at least 3, got {}", self.correlation_window);
        }

        if self.reference_symbol.is_empty() {
            anyhow::bail!("reference_symbol must not be empty");
        }

        if !common::is_known_timeframe(&self.timeframe) {
            anyhow::bail!("unknown detector timeframe {:?}", self.timeframe);
        }

        Ok(())
    }
}

fn default_reference_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_shock_thresholds() -> Thresholds {
    Thresholds::new(0.05, 0.08)
}

fn default_breadth_thresholds() -> Thresholds {
    Thresholds::new(0.40, 0.50)
}

fn default_direction_dead_zone() -> f64 {
    0.005
}

fn default_correlation_thresholds() -> Thresholds {
    Thresholds::new(0.30, 0.50)
}

fn default_correlation_window() -> usize {
    24
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<DetectorConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: DetectorConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &DetectorConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shock, Thresholds::new(0.05, 0.08));
        assert_eq!(config.correlation_window, 24);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DetectorConfig = toml::from_str(
            r#"
            reference_symbol = "ETHUSDT"

            [breadth]
            warning = 0.3
            critical = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(config.reference_symbol, "ETHUSDT");
        assert_eq!(config.breadth, Thresholds::new(0.3, 0.6));
        assert_eq!(config.shock, Thresholds::new(0.05, 0.08));
        assert_eq!(config.timeframe, "1h");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = DetectorConfig {
            shock: Thresholds::new(0.08, 0.05),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DetectorConfig {
            correlation_window: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("detector-{}.toml", uuid::Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();

        let config = DetectorConfig {
            correlation_window: 12,
            ..Default::default()
        };
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.correlation_window, 12);
        assert_eq!(loaded.breadth, config.breadth);
    }
}
