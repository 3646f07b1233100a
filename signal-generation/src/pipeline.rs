// Signal Generation Pipeline
// Per-cycle driver: fetch -> closure -> ledger -> evidence -> score -> gate -> emit -> mark

use super::confluence::{BlockReason, ConfluenceConfig, ConfluenceScorer};
use super::evidence::{build_evidence, Evidence, TrendRule};
use super::ledger::{CandleLedger, InMemoryLedger};
use super::scoring::{price_levels, TechnicalScorer, MAX_BASE_SCORE};
use super::storage::{InMemorySignalStorage, SignalStorage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{
    closed_window, deliver_best_effort, resolve_closed_candle, AlertChannel, AlertLevel, CandleRecord,
    FetchError, InsufficientData, Signal, Uuid, Warning,
};
use data_ingestion::MarketDataProvider;
use futures::stream::{self, StreamExt};
use risk_control::{AnomalyDetector, MarketSnapshot, OrchestrationGate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Configuration for the signal generation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timeframe signals are emitted on and the ledger is keyed by
    #[serde(default = "default_entry_timeframe")]
    pub entry_timeframe: String,
    /// Slower timeframes consulted for confluence
    #[serde(default = "default_context_timeframes")]
    pub context_timeframes: Vec<String>,
    /// Candles requested per fetch
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,
    /// Also mark the candle processed on a definitive rejection
    #[serde(default)]
    pub mark_on_rejection: bool,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    /// Trend reading for the entry timeframe
    #[serde(default = "TrendRule::entry")]
    pub entry_trend: TrendRule,
    /// Trend reading for every context timeframe
    #[serde(default = "TrendRule::context")]
    pub context_trend: TrendRule,
}

fn default_entry_timeframe() -> String {
    "1h".to_string()
}

fn default_context_timeframes() -> Vec<String> {
    vec!["4h".to_string()]
}

fn default_candle_limit() -> usize {
    250
}

fn default_max_concurrent_symbols() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            entry_timeframe: default_entry_timeframe(),
            context_timeframes: default_context_timeframes(),
            candle_limit: default_candle_limit(),
            max_concurrent_symbols: default_max_concurrent_symbols(),
            mark_on_rejection: false,
            confluence: ConfluenceConfig::default(),
            entry_trend: TrendRule::entry(),
            context_trend: TrendRule::context(),
        }
    }
}

impl PipelineConfig {
    /// Entry timeframe followed by the context timeframes, without duplicates
    pub fn timeframes(&self) -> Vec<String> {
        let mut timeframes = vec![self.entry_timeframe.clone()];
        for tf in &self.context_timeframes {
            if !timeframes.contains(tf) {
                timeframes.push(tf.clone());
            }
        }
        timeframes
    }
}

/// What happened to one symbol in one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Emitted(Signal),
    /// Closed candle not newer than the ledger
    Skipped { closed_ts: i64 },
    /// Gate paused; nothing emitted or marked
    Suppressed { reason: Option<String> },
    Blocked(BlockReason),
    Rejected { final_score: f64 },
    /// Base score produced no candidate side
    NoDirection,
    NotActionable(InsufficientData),
    FetchFailed(String),
    /// Persistence failure. A failed ledger upsert leaves the candle
    /// unprocessed; a failed signal store after the upsert leaves it marked
    /// with no signal kept, so it is never emitted twice.
    Failed(String),
}

impl CycleOutcome {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            CycleOutcome::Emitted(signal) => Some(signal),
            _ => None,
        }
    }
}

/// Result of one pipeline cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub warnings: Vec<Warning>,
    /// In universe order
    pub outcomes: Vec<(String, CycleOutcome)>,
}

impl CycleReport {
    pub fn signals(&self) -> Vec<&Signal> {
        self.outcomes.iter().filter_map(|(_, o)| o.signal()).collect()
    }

    pub fn outcome(&self, symbol: &str) -> Option<&CycleOutcome> {
        self.outcomes.iter().find(|(s, _)| s == symbol).map(|(_, o)| o)
    }

    pub fn count(&self, pred: impl Fn(&CycleOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

type FetchedWindows = HashMap<String, HashMap<String, Result<Vec<CandleRecord>, FetchError>>>;

/// Render a signal for the alert channel
pub fn format_signal_alert(signal: &Signal) -> String {
    let mut msg = format!(
        "{} {} {} | score {:.1} ({:.0}%)\nentry {} | stop {} | target {}",
        signal.side,
        signal.symbol,
        signal.timeframe,
        signal.score,
        signal.confidence * 100.0,
        signal.entry_price,
        signal.stop_loss,
        signal.take_profit,
    );
    if !signal.reasons.is_empty() {
        msg.push('\n');
        msg.push_str(&signal.reasons.join("; "));
    }
    msg
}

/// Signal generation pipeline
pub struct SignalPipeline {
    config: PipelineConfig,
    provider: Arc<dyn MarketDataProvider>,
    detector: Arc<AnomalyDetector>,
    ledger: Arc<dyn CandleLedger>,
    storage: Arc<dyn SignalStorage>,
    alerts: Option<Arc<dyn AlertChannel>>,
    scorer: TechnicalScorer,
    confluence: ConfluenceScorer,
}

impl SignalPipeline {
    /// Create a pipeline with in-memory ledger and storage
    pub fn new(config: PipelineConfig, provider: Arc<dyn MarketDataProvider>, detector: Arc<AnomalyDetector>) -> Self {
        let confluence = ConfluenceScorer::new(
            config.confluence.clone(),
            config.entry_timeframe.clone(),
            config.context_timeframes.clone(),
        );
        Self {
            config,
            provider,
            detector,
            ledger: Arc::new(InMemoryLedger::new()),
            storage: Arc::new(InMemorySignalStorage::new()),
            alerts: None,
            scorer: TechnicalScorer::new(),
            confluence,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn CandleLedger>) -> Self {
        info!("Setting candle ledger");
        self.ledger = ledger;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn SignalStorage>) -> Self {
        info!("Setting signal storage");
        self.storage = storage;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertChannel>) -> Self {
        info!(channel = alerts.name(), "Setting signal alert channel");
        self.alerts = Some(alerts);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<OrchestrationGate> {
        self.detector.gate()
    }

    pub fn ledger(&self) -> &Arc<dyn CandleLedger> {
        &self.ledger
    }

    pub fn storage(&self) -> &Arc<dyn SignalStorage> {
        &self.storage
    }

    /// Run one cycle over `symbols`
    pub async fn run_cycle(&self, symbols: &[String]) -> CycleReport {
        let started_at = Utc::now();
        let fetched = self.fetch_all(symbols).await;

        let snapshot = self.snapshot(symbols, &fetched);
        let warnings = self.detector.evaluate(&snapshot).await;

        let tasks: Vec<_> = symbols
            .iter()
            .map(|symbol| {
                let fetched = &fetched;
                async move {
                    let outcome = match self.process_symbol(symbol, fetched).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let message = format!("{:#}", e);
                            error!(symbol = %symbol, error = %message, "Symbol processing failed");
                            CycleOutcome::Failed(message)
                        }
                    };
                    (symbol.clone(), outcome)
                }
            })
            .collect();
        let outcomes: Vec<(String, CycleOutcome)> = stream::iter(tasks)
            .buffered(self.config.max_concurrent_symbols.max(1))
            .collect()
            .await;

        let emitted = outcomes.iter().filter(|(_, o)| o.signal().is_some()).count();
        info!(
            symbols = symbols.len(),
            emitted,
            warnings = warnings.len(),
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "Pipeline cycle complete"
        );

        CycleReport {
            started_at,
            warnings,
            outcomes,
        }
    }

    /// Fetch every timeframe for every symbol, plus the detector's reference
    async fn fetch_all(&self, symbols: &[String]) -> FetchedWindows {
        let detector = self.detector.config();
        let mut timeframes = self.config.timeframes();
        if !timeframes.contains(&detector.timeframe) {
            timeframes.push(detector.timeframe.clone());
        }

        let mut wanted: Vec<String> = symbols.to_vec();
        if !wanted.contains(&detector.reference_symbol) {
            wanted.push(detector.reference_symbol.clone());
        }

        let jobs: Vec<(String, String)> = wanted
            .iter()
            .flat_map(|s| timeframes.iter().map(move |tf| (s.clone(), tf.clone())))
            .collect();

        let limit = self.config.candle_limit;
        let results: Vec<(String, String, Result<Vec<CandleRecord>, FetchError>)> = stream::iter(jobs)
            .map(|(symbol, tf)| async move {
                let result = self.provider.fetch_candles(&symbol, &tf, limit).await;
                (symbol, tf, result)
            })
            .buffer_unordered(self.config.max_concurrent_symbols.max(1))
            .collect()
            .await;

        let mut fetched: FetchedWindows = HashMap::new();
        for (symbol, tf, result) in results {
            fetched.entry(symbol).or_default().insert(tf, result);
        }
        fetched
    }

    fn snapshot(&self, symbols: &[String], fetched: &FetchedWindows) -> MarketSnapshot {
        let detector = self.detector.config();
        let window = |symbol: &str| -> Option<Vec<CandleRecord>> {
            match fetched.get(symbol)?.get(&detector.timeframe)? {
                Ok(candles) => Some(candles.clone()),
                Err(_) => None,
            }
        };

        MarketSnapshot {
            timeframe: detector.timeframe.clone(),
            reference: window(&detector.reference_symbol).unwrap_or_default(),
            symbols: symbols
                .iter()
                .filter(|s| **s != detector.reference_symbol)
                .filter_map(|s| window(s).map(|c| (s.clone(), c)))
                .collect(),
        }
    }

    async fn process_symbol(&self, symbol: &str, fetched: &FetchedWindows) -> Result<CycleOutcome> {
        let entry_tf = &self.config.entry_timeframe;

        let mut windows: HashMap<&str, &[CandleRecord]> = HashMap::new();
        for tf in self.config.context_timeframes.iter().chain(std::iter::once(entry_tf)) {
            match fetched.get(symbol).and_then(|m| m.get(tf)) {
                Some(Ok(candles)) => {
                    windows.insert(tf.as_str(), candles.as_slice());
                }
                Some(Err(e)) => {
                    warn!(symbol = %symbol, timeframe = %tf, error = %e, "fetch failed");
                    return Ok(CycleOutcome::FetchFailed(e.to_string()));
                }
                None => {
                    warn!(symbol = %symbol, timeframe = %tf, "fetch failed");
                    return Ok(CycleOutcome::FetchFailed(format!("no {} data", tf)));
                }
            }
        }

        let entry_candles = windows.get(entry_tf.as_str()).copied().unwrap_or_default();
        let closed = match resolve_closed_candle(entry_candles) {
            Ok(candle) => candle,
            Err(e) => {
                info!(symbol = %symbol, timeframe = %entry_tf, reason = %e, "not actionable: insufficient data");
                return Ok(CycleOutcome::NotActionable(e));
            }
        };
        let closed_ts = closed.open_time;

        let last = self.ledger.last_processed(symbol, entry_tf).await?;
        if closed_ts <= last {
            info!(symbol = %symbol, timeframe = %entry_tf, closed_ts, last_processed = last, "skip: already processed");
            return Ok(CycleOutcome::Skipped { closed_ts });
        }

        let evidence = self.collect_evidence(symbol, &windows);

        let base = match self.scorer.score(closed_window(entry_candles)) {
            Ok(base) => base,
            Err(e) => {
                info!(symbol = %symbol, timeframe = %entry_tf, reason = %e, "not actionable: insufficient data");
                return Ok(CycleOutcome::NotActionable(e));
            }
        };

        let Some(side) = base.side else {
            info!(symbol = %symbol, timeframe = %entry_tf, score = base.total, "no direction");
            return Ok(CycleOutcome::NoDirection);
        };

        let decision = self.confluence.decide(base.total, side, &evidence);

        if let Some(reason) = decision.verdict.blocking_reason.clone() {
            match &reason {
                BlockReason::CounterTrendEntry => {
                    info!(symbol = %symbol, side = %side, base = base.total, "blocked: counter-trend");
                    self.mark_rejection(symbol, closed_ts).await?;
                }
                BlockReason::MissingEvidence { timeframe } => {
                    info!(symbol = %symbol, side = %side, missing = %timeframe, "blocked: missing evidence");
                }
            }
            return Ok(CycleOutcome::Blocked(reason));
        }

        if !decision.accepted {
            info!(
                symbol = %symbol,
                side = %side,
                base = decision.base_score,
                penalty = decision.verdict.penalty,
                final_score = decision.final_score,
                threshold = self.confluence.config().acceptance_threshold,
                "rejected: below threshold"
            );
            self.mark_rejection(symbol, closed_ts).await?;
            return Ok(CycleOutcome::Rejected {
                final_score: decision.final_score,
            });
        }

        let pause = self.gate().status().await;
        if pause.paused {
            info!(symbol = %symbol, side = %side, reason = ?pause.reason, "suppressed: paused");
            return Ok(CycleOutcome::Suppressed { reason: pause.reason });
        }

        let levels = price_levels(base.last_close, base.atr_pct, side);
        let mut reasons = base.reasons;
        reasons.extend(decision.verdict.notes);

        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe: entry_tf.clone(),
            side,
            score: decision.final_score,
            confidence: (decision.final_score / MAX_BASE_SCORE).clamp(0.0, 1.0),
            entry_price: levels.entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            reasons,
            created_at: Utc::now(),
            source_candle_ts: closed_ts,
        };

        let marked = self
            .ledger
            .mark_processed(symbol, entry_tf, closed_ts)
            .await
            .context("Failed to mark candle processed")?;
        if !marked.is_new() {
            info!(symbol = %symbol, timeframe = %entry_tf, closed_ts, "skip: already processed");
            return Ok(CycleOutcome::Skipped { closed_ts });
        }

        // Marked before storing: a store failure loses this signal rather than risk a repeat
        let stored = self.storage.store(&signal).await.context("Failed to store signal")?;
        if !stored {
            info!(symbol = %symbol, timeframe = %entry_tf, closed_ts, "skip: already processed");
            return Ok(CycleOutcome::Skipped { closed_ts });
        }

        if let Some(alerts) = &self.alerts {
            deliver_best_effort(alerts.as_ref(), &format_signal_alert(&signal), AlertLevel::Info).await;
        }

        info!(
            symbol = %symbol,
            timeframe = %entry_tf,
            side = %side,
            score = signal.score,
            closed_ts,
            "signal emitted"
        );
        Ok(CycleOutcome::Emitted(signal))
    }

    /// Evidence per timeframe from closed candles only. Timeframes that cannot
    /// be built are left out so confluence fails closed on them.
    fn collect_evidence(&self, symbol: &str, windows: &HashMap<&str, &[CandleRecord]>) -> HashMap<String, Evidence> {
        let mut evidence = HashMap::new();
        for (tf, candles) in windows {
            let rule = if *tf == self.config.entry_timeframe {
                self.config.entry_trend
            } else {
                self.config.context_trend
            };
            match build_evidence(tf, closed_window(candles), &rule) {
                Ok(e) => {
                    evidence.insert(tf.to_string(), e);
                }
                Err(e) => {
                    debug!(symbol = %symbol, timeframe = %tf, reason = %e, "Evidence unavailable");
                }
            }
        }
        evidence
    }

    async fn mark_rejection(&self, symbol: &str, closed_ts: i64) -> Result<()> {
        if self.config.mark_on_rejection {
            self.ledger
                .mark_processed(symbol, &self.config.entry_timeframe, closed_ts)
                .await
                .context("Failed to mark rejected candle")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Side;
    use rust_decimal::Decimal;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.entry_timeframe, "1h");
        assert_eq!(config.context_timeframes, vec!["4h".to_string()]);
        assert!(!config.mark_on_rejection);
        assert_eq!(config.confluence.acceptance_threshold, 7.0);
        assert_eq!(config.entry_trend, TrendRule::entry());
        assert_eq!(config.context_trend, TrendRule::context());
    }

    #[test]
    fn test_timeframes_deduplicated() {
        let config = PipelineConfig {
            context_timeframes: vec!["4h".to_string(), "1h".to_string(), "4h".to_string()],
            ..Default::default()
        };
        assert_eq!(config.timeframes(), vec!["1h".to_string(), "4h".to_string()]);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: PipelineConfig = toml::from_str("entry_timeframe = \"15m\"\nmark_on_rejection = true").unwrap();
        assert_eq!(config.entry_timeframe, "15m");
        assert!(config.mark_on_rejection);
        assert_eq!(config.candle_limit, 250);
    }

    #[test]
    fn test_format_signal_alert() {
        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: "ETHUSDT".to_string(),
            timeframe: "1h".to_string(),
            side: Side::Short,
            score: 7.5,
            confidence: 0.75,
            entry_price: Decimal::new(2500, 0),
            stop_loss: Decimal::new(2575, 0),
            take_profit: Decimal::new(2350, 0),
            reasons: vec!["RSI overbought (74.0)".to_string()],
            created_at: Utc::now(),
            source_candle_ts: 0,
        };

        let msg = format_signal_alert(&signal);
        assert!(msg.starts_with("SHORT ETHUSDT 1h | score 7.5 (75%)"));
        assert!(msg.contains("stop 2575"));
        assert!(msg.contains("RSI overbought"));
    }
}
