// Scan universe
// Static symbol list, or a contract listing refreshed on a schedule and narrowed by market filters

use anyhow::{Context, Result};
use data_ingestion::{MarketListing, MarketTicker};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Market filters applied to every listed contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseFilter {
    /// Minimum 24h quote volume
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: f64,
    /// Maximum bid/ask spread, in percent of the bid
    #[serde(default = "default_max_spread_percent")]
    pub max_spread_percent: f64,
    /// Regular expressions matched anywhere in the symbol
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_exclude_symbols")]
    pub exclude_symbols: Vec<String>,
    /// Largest venue minimum order value we accept
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default)]
    pub max_price: Option<f64>,
}

fn default_min_volume_usd() -> f64 {
    1_000_000.0
}

fn default_max_spread_percent() -> f64 {
    0.05
}

fn default_exclude_patterns() -> Vec<String> {
    ["BUSD", "DOWNUSDT$", "BEAR", "BULL", "3L$", "3S$", "5L$", "5S$"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_symbols() -> Vec<String> {
    vec!["USDTUSDT".to_string()]
}

fn default_min_notional() -> f64 {
    10.0
}

fn default_min_price() -> f64 {
    0.0001
}

impl Default for UniverseFilter {
    fn default() -> Self {
        Self {
            min_volume_usd: default_min_volume_usd(),
            max_spread_percent: default_max_spread_percent(),
            exclude_patterns: default_exclude_patterns(),
            exclude_symbols: default_exclude_symbols(),
            min_notional: default_min_notional(),
            min_price: default_min_price(),
            max_price: None,
        }
    }
}

/// Scheduled universe refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseRefreshConfig {
    /// Replace the static universe with the filtered listing
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
    /// Listing attempts per refresh
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub filters: UniverseFilter,
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

impl Default for UniverseRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_refresh_interval_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            filters: UniverseFilter::default(),
        }
    }
}

/// Why a contract was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Volume,
    Spread,
    Excluded,
    Notional,
    Price,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Exclusion::Volume => "volume",
            Exclusion::Spread => "spread",
            Exclusion::Excluded => "excluded",
            Exclusion::Notional => "notional",
            Exclusion::Price => "price",
        };
        f.write_str(s)
    }
}

/// Exclusion counts from one filter pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub volume: usize,
    pub spread: usize,
    pub excluded: usize,
    pub notional: usize,
    pub price: usize,
}

impl FilterStats {
    fn add(&mut self, exclusion: Exclusion) {
        match exclusion {
            Exclusion::Volume => self.volume += 1,
            Exclusion::Spread => self.spread += 1,
            Exclusion::Excluded => self.excluded += 1,
            Exclusion::Notional => self.notional += 1,
            Exclusion::Price => self.price += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.volume + self.spread + self.excluded + self.notional + self.price
    }
}

/// Compiled form of [`UniverseFilter`].
///
/// Checks run in order volume, spread, exclusion list, notional, price.
/// A statistic the venue did not report never excludes a contract.
pub struct MarketFilter {
    config: UniverseFilter,
    patterns: Vec<Regex>,
}

impl MarketFilter {
    pub fn new(config: UniverseFilter) -> Result<Self> {
        let patterns = config
            .exclude_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid exclude pattern {:?}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, patterns })
    }

    pub fn check(&self, market: &MarketTicker) -> Result<(), (Exclusion, String)> {
        let c = &self.config;

        if let Some(volume) = market.quote_volume_24h {
            if volume < c.min_volume_usd {
                return Err((
                    Exclusion::Volume,
                    format!("volume {:.0} < min {:.0}", volume, c.min_volume_usd),
                ));
            }
        }

        if let Some(spread) = market.spread_percent() {
            if spread > c.max_spread_percent {
                return Err((
                    Exclusion::Spread,
                    format!("spread {:.4}% > max {}%", spread, c.max_spread_percent),
                ));
            }
        }

        if c.exclude_symbols.iter().any(|s| *s == market.symbol) {
            return Err((Exclusion::Excluded, "explicitly excluded".to_string()));
        }
        if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(&market.symbol)) {
            return Err((Exclusion::Excluded, format!("matches {}", pattern.as_str())));
        }

        if let Some(min_cost) = market.min_notional {
            if min_cost > c.min_notional {
                return Err((
                    Exclusion::Notional,
                    format!("min order {} exceeds {}", min_cost, c.min_notional),
                ));
            }
        }

        if let Some(last) = market.last_price {
            if last < c.min_price {
                return Err((Exclusion::Price, format!("price {} < min {}", last, c.min_price)));
            }
            if let Some(max) = c.max_price {
                if last > max {
                    return Err((Exclusion::Price, format!("price {} > max {}", last, max)));
                }
            }
        }

        Ok(())
    }

    /// Symbols passing every check, sorted, with the exclusion counts
    pub fn apply(&self, markets: &[MarketTicker]) -> (Vec<String>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut selected = BTreeSet::new();

        for market in markets {
            match self.check(market) {
                Ok(()) => {
                    selected.insert(market.symbol.clone());
                }
                Err((exclusion, reason)) => {
                    debug!(symbol = %market.symbol, filter = %exclusion, reason = %reason, "Market excluded");
                    stats.add(exclusion);
                }
            }
        }

        (selected.into_iter().collect(), stats)
    }
}

/// Symbol differences between two universes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UniverseChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl UniverseChanges {
    pub fn between(old: &[String], new: &[String]) -> Self {
        let old: BTreeSet<&String> = old.iter().collect();
        let new: BTreeSet<&String> = new.iter().collect();

        Self {
            added: new.difference(&old).map(|s| s.to_string()).collect(),
            removed: old.difference(&new).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub listed: usize,
    pub selected: usize,
    pub changes: UniverseChanges,
    pub stats: FilterStats,
}

struct RefreshSource {
    listing: Arc<dyn MarketListing>,
    filter: MarketFilter,
    interval: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

/// Current scan universe
pub struct UniverseManager {
    symbols: RwLock<Vec<String>>,
    source: Option<RefreshSource>,
}

impl UniverseManager {
    /// A universe that never changes
    pub fn fixed(symbols: Vec<String>) -> Self {
        Self {
            symbols: RwLock::new(symbols),
            source: None,
        }
    }

    /// A universe rebuilt from `listing` on every refresh. `seed` is scanned
    /// until the first refresh succeeds.
    pub fn refreshing(seed: Vec<String>, listing: Arc<dyn MarketListing>, config: &UniverseRefreshConfig) -> Result<Self> {
        let filter = MarketFilter::new(config.filters.clone())?;

        Ok(Self {
            symbols: RwLock::new(seed),
            source: Some(RefreshSource {
                listing,
                filter,
                interval: Duration::from_secs(config.interval_secs),
                max_attempts: config.max_attempts.max(1),
                retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            }),
        })
    }

    /// `None` for a fixed universe
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.source.as_ref().map(|s| s.interval)
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.symbols.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.symbols.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.symbols.read().await.is_empty()
    }

    /// Reload and filter the listing. On any failure, or when the filters
    /// leave nothing, the current universe is kept. A fixed universe returns
    /// `Ok(None)`.
    pub async fn refresh(&self) -> Result<Option<RefreshReport>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };

        info!(listing = source.listing.name(), "Starting universe refresh");
        let markets = Self::list_with_retry(source).await?;
        let (selected, stats) = source.filter.apply(&markets);

        if selected.is_empty() {
            anyhow::bail!("filters excluded all {} listed markets", markets.len());
        }

        let mut symbols = self.symbols.write().await;
        let changes = UniverseChanges::between(&symbols, &selected);
        *symbols = selected;

        let report = RefreshReport {
            listed: markets.len(),
            selected: symbols.len(),
            changes,
            stats,
        };

        if report.changes.is_empty() {
            info!(listed = report.listed, selected = report.selected, "Universe unchanged");
        } else {
            info!(
                listed = report.listed,
                selected = report.selected,
                excluded = report.stats.total(),
                added = ?report.changes.added,
                removed = ?report.changes.removed,
                "Universe refreshed"
            );
        }
        Ok(Some(report))
    }

    async fn list_with_retry(source: &RefreshSource) -> Result<Vec<MarketTicker>> {
        let mut backoff = source.retry_backoff;
        let mut attempt = 1;

        loop {
            match source.listing.list_markets().await {
                Ok(markets) => return Ok(markets),
                Err(e) if attempt < source.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = source.max_attempts,
                        retry_in_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Market listing failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Market listing failed after {} attempts", attempt));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_ingestion::InMemoryProvider;

    fn ticker(symbol: &str, volume: f64, price: f64) -> MarketTicker {
        MarketTicker {
            symbol: symbol.to_string(),
            quote_volume_24h: Some(volume),
            last_price: Some(price),
            bid: Some(price),
            ask: Some(price * 1.0002),
            min_notional: Some(5.0),
        }
    }

    fn filter() -> MarketFilter {
        MarketFilter::new(UniverseFilter::default()).unwrap()
    }

    fn refresh_config() -> UniverseRefreshConfig {
        UniverseRefreshConfig {
            enabled: true,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_order_and_reasons() {
        let f = filter();

        assert!(f.check(&ticker("ETHUSDT", 5e9, 2500.0)).is_ok());
        assert_eq!(f.check(&ticker("DUSTUSDT", 10_000.0, 1.0)).unwrap_err().0, Exclusion::Volume);

        let mut wide = ticker("WIDEUSDT", 5e6, 1.0);
        wide.ask = Some(1.01);
        assert_eq!(f.check(&wide).unwrap_err().0, Exclusion::Spread);

        assert_eq!(f.check(&ticker("BTCDOWNUSDT", 5e6, 1.0)).unwrap_err().0, Exclusion::Excluded);
        assert_eq!(f.check(&ticker("USDTUSDT", 5e6, 1.0)).unwrap_err().0, Exclusion::Excluded);

        let mut pricey_order = ticker("BIGUSDT", 5e6, 1.0);
        pricey_order.min_notional = Some(100.0);
        assert_eq!(f.check(&pricey_order).unwrap_err().0, Exclusion::Notional);

        assert_eq!(f.check(&ticker("TINYUSDT", 5e6, 0.00001)).unwrap_err().0, Exclusion::Price);

        // Low volume wins over every later check
        assert_eq!(f.check(&ticker("BULLUSDT", 1.0, 0.00001)).unwrap_err().0, Exclusion::Volume);
    }

    #[test]
    fn test_missing_statistics_pass() {
        assert!(filter().check(&MarketTicker::new("NEWUSDT")).is_ok());
    }

    #[test]
    fn test_max_price_is_optional() {
        let f = MarketFilter::new(UniverseFilter {
            max_price: Some(1_000.0),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(f.check(&ticker("BTCUSDT", 5e9, 64_000.0)).unwrap_err().0, Exclusion::Price);
        assert!(filter().check(&ticker("BTCUSDT", 5e9, 64_000.0)).is_ok());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = MarketFilter::new(UniverseFilter {
            exclude_patterns: vec!["(".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_counts_exclusions() {
        let markets = vec![
            ticker("SOLUSDT", 5e8, 150.0),
            ticker("DUSTUSDT", 1.0, 1.0),
            ticker("ETHUSDT", 5e9, 2500.0),
            ticker("BTCBULLUSDT", 5e6, 1.0),
        ];

        let (selected, stats) = filter().apply(&markets);

        assert_eq!(selected, symbols(&["ETHUSDT", "SOLUSDT"]));
        assert_eq!(stats.volume, 1);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn test_changes_between_universes() {
        let changes = UniverseChanges::between(&symbols(&["BTCUSDT", "ETHUSDT"]), &symbols(&["ETHUSDT", "SOLUSDT"]));
        assert_eq!(changes.added, symbols(&["SOLUSDT"]));
        assert_eq!(changes.removed, symbols(&["BTCUSDT"]));
        assert!(UniverseChanges::between(&symbols(&["ETHUSDT"]), &symbols(&["ETHUSDT"])).is_empty());
    }

    #[tokio::test]
    async fn test_fixed_universe_never_refreshes() {
        let universe = UniverseManager::fixed(symbols(&["ETHUSDT"]));
        assert!(universe.refresh_interval().is_none());
        assert!(universe.refresh().await.unwrap().is_none());
        assert_eq!(universe.symbols().await, symbols(&["ETHUSDT"]));
    }

    #[tokio::test]
    async fn test_refresh_replaces_seed() {
        let listing = Arc::new(InMemoryProvider::new());
        listing
            .set_markets(vec![ticker("SOLUSDT", 5e8, 150.0), ticker("ETHUSDT", 5e9, 2500.0), ticker("DUSTUSDT", 1.0, 1.0)])
            .await;

        let universe = UniverseManager::refreshing(symbols(&["BTCUSDT", "ETHUSDT"]), listing, &refresh_config()).unwrap();
        assert_eq!(universe.refresh_interval(), Some(Duration::from_secs(3600)));

        let report = universe.refresh().await.unwrap().unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.selected, 2);
        assert_eq!(report.changes.added, symbols(&["SOLUSDT"]));
        assert_eq!(report.changes.removed, symbols(&["BTCUSDT"]));
        assert_eq!(universe.symbols().await, symbols(&["ETHUSDT", "SOLUSDT"]));
    }

    #[tokio::test]
    async fn test_refresh_retries_transient_failures() {
        let listing = Arc::new(InMemoryProvider::new());
        listing.set_markets(vec![ticker("ETHUSDT", 5e9, 2500.0)]).await;
        listing.fail_next_listings(2);

        let universe = UniverseManager::refreshing(symbols(&["BTCUSDT"]), listing, &refresh_config()).unwrap();

        assert!(universe.refresh().await.unwrap().is_some());
        assert_eq!(universe.symbols().await, symbols(&["ETHUSDT"]));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_current_universe() {
        let listing = Arc::new(InMemoryProvider::new());
        listing.set_markets(vec![ticker("ETHUSDT", 5e9, 2500.0)]).await;
        listing.fail_next_listings(3);

        let universe = UniverseManager::refreshing(symbols(&["BTCUSDT"]), listing.clone(), &refresh_config()).unwrap();
        let err = universe.refresh().await.unwrap_err();
        assert!(format!("{:#}", err).contains("after 3 attempts"));
        assert_eq!(universe.symbols().await, symbols(&["BTCUSDT"]));

        // Everything filtered out also keeps the current list
        listing.set_markets(vec![ticker("DUSTUSDT", 1.0, 1.0)]).await;
        assert!(universe.refresh().await.is_err());
        assert_eq!(universe.symbols().await, symbols(&["BTCUSDT"]));
    }
}
