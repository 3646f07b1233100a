//! Market anomaly detection
//!
//! Three independent checks run over the same candle windows the signal
//! pipeline uses: a reference-asset shock, a breadth collapse, and a spike in
//! correlation with the reference. A check that cannot be computed is skipped
//! for the cycle. CRITICAL findings pause the orchestration gate.

use crate::config::{DetectorConfig, Thresholds};
use crate::correlation::{CorrelationShift, CorrelationTracker};
use crate::gate::OrchestrationGate;
use crate::warnings::WarningStorage;
use common::{closed_window, deliver_best_effort, AlertChannel, CandleRecord, Severity, TrendDirection, Warning, WarningType};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Candle windows fetched for one evaluation cycle, forming bar included
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub timeframe: String,
    /// Reference asset window
    pub reference: Vec<CandleRecord>,
    /// Universe windows keyed by symbol
    pub symbols: HashMap<String, Vec<CandleRecord>>,
}

/// Direction of the last bar-over-bar move, with moves inside the dead zone
/// counted as neutral. `None` when it cannot be computed.
pub fn short_term_direction(candles: &[CandleRecord], dead_zone: f64) -> Option<TrendDirection> {
    let n = candles.len();
    if n < 2 || candles[n - 2].close <= 0.0 {
        return None;
    }

    let change = (candles[n - 1].close - candles[n - 2].close) / candles[n - 2].close;
    Some(if change > dead_zone {
        TrendDirection::Bullish
    } else if change < -dead_zone {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    })
}

fn tier_threshold(thresholds: Thresholds, severity: Severity) -> f64 {
    match severity {
        Severity::Warning => thresholds.warning,
        Severity::Critical => thresholds.critical,
    }
}

/// Render a warning for the alert channel
pub fn format_warning_alert(warning: &Warning) -> String {
    format!(
        "[{}] {}: {} (value {:.4}, threshold {:.4})",
        warning.severity, warning.warning_type, warning.message, warning.triggered_value, warning.threshold
    )
}

/// Anomaly detector with its gate, warning log and alert collaborators
pub struct AnomalyDetector {
    config: DetectorConfig,
    gate: Arc<OrchestrationGate>,
    storage: Arc<dyn WarningStorage>,
    alerts: Option<Arc<dyn AlertChannel>>,
    tracker: Mutex<CorrelationTracker>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig, gate: Arc<OrchestrationGate>, storage: Arc<dyn WarningStorage>) -> Self {
        let tracker = Mutex::new(CorrelationTracker::new(config.correlation_window));
        Self {
            config,
            gate,
            storage,
            alerts: None,
            tracker,
        }
    }

    /// Deliver every raised warning through `alerts`
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertChannel>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<OrchestrationGate> {
        &self.gate
    }

    /// Run all checks over `snapshot`, record what they find and return it.
    pub async fn evaluate(&self, snapshot: &MarketSnapshot) -> Vec<Warning> {
        if snapshot.reference.is_empty() {
            warn!(
                reference = %self.config.reference_symbol,
                "Reference data missing, anomaly checks skipped"
            );
            return Vec::new();
        }

        let correlation = self.check_correlation_spike(snapshot).await;
        let warnings: Vec<Warning> = [
            self.check_reference_shock(&snapshot.reference),
            self.check_breadth_collapse(snapshot),
            correlation,
        ]
        .into_iter()
        .flatten()
        .collect();

        for warning in &warnings {
            self.raise(warning).await;
        }

        warnings
    }

    /// Bar-over-bar move of the reference asset
    pub fn check_reference_shock(&self, reference: &[CandleRecord]) -> Option<Warning> {
        let n = reference.len();
        if n < 2 {
            debug!(available = n, "Shock check skipped: insufficient reference history");
            return None;
        }

        let previous = &reference[n - 2];
        let current = &reference[n - 1];
        if previous.close <= 0.0 {
            return None;
        }

        let change = current.close - previous.close;
        let pct_change = change.abs() / previous.close;
        let severity = Severity::classify(pct_change, self.config.shock.warning, self.config.shock.critical)?;
        let direction = if change >= 0.0 { "up" } else { "down" };

        Some(Warning::new(
            WarningType::BtcShock,
            severity,
            format!(
                "{} price {} by {:.2}% on {}",
                self.config.reference_symbol,
                direction,
                pct_change * 100.0,
                current.timeframe
            ),
            pct_change,
            tier_threshold(self.config.shock, severity),
            json!({
                "symbol": self.config.reference_symbol,
                "direction": direction,
                "previous_close": previous.close,
                "current_close": current.close,
                "candle_ts": current.open_time,
            }),
        ))
    }

    /// Share of directional symbols moving against the reference trend
    pub fn check_breadth_collapse(&self, snapshot: &MarketSnapshot) -> Option<Warning> {
        let dead_zone = self.config.direction_dead_zone;
        let reference_trend = match short_term_direction(&snapshot.reference, dead_zone) {
            Some(trend) if trend != TrendDirection::Neutral => trend,
            _ => {
                debug!("Breadth check skipped: reference has no clear direction");
                return None;
            }
        };

        let (mut bullish, mut bearish, mut neutral) = (0usize, 0usize, 0usize);
        for (symbol, candles) in &snapshot.symbols {
            if *symbol == self.config.reference_symbol {
                continue;
            }
            match short_term_direction(candles, dead_zone) {
                Some(TrendDirection::Bullish) => bullish += 1,
                Some(TrendDirection::Bearish) => bearish += 1,
                _ => neutral += 1,
            }
        }

        let directional = bullish + bearish;
        if directional == 0 {
            debug!("Breadth check skipped: no directional symbols");
            return None;
        }

        let against = if reference_trend == TrendDirection::Bullish { bearish } else { bullish };
        let pct_against = against as f64 / directional as f64;
        let severity = Severity::classify(pct_against, self.config.breadth.warning, self.config.breadth.critical)?;

        Some(Warning::new(
            WarningType::BreadthCollapse,
            severity,
            format!(
                "{:.0}% of directional symbols ({}/{}) moving against {} {} trend",
                pct_against * 100.0,
                against,
                directional,
                reference_trend,
                self.config.reference_symbol
            ),
            pct_against,
            tier_threshold(self.config.breadth, severity),
            json!({
                "reference_trend": reference_trend,
                "against": against,
                "directional": directional,
                "bullish": bullish,
                "bearish": bearish,
                "no_direction": neutral,
            }),
        ))
    }

    /// Largest shift in rolling correlation with the reference across the
    /// universe. Only closed candles feed the buffers.
    pub async fn check_correlation_spike(&self, snapshot: &MarketSnapshot) -> Option<Warning> {
        let reference_closed = closed_window(&snapshot.reference);
        let mut tracker = self.tracker.lock().await;

        let mut shifts: Vec<(&str, CorrelationShift)> = Vec::new();
        for (symbol, candles) in &snapshot.symbols {
            if *symbol == self.config.reference_symbol {
                continue;
            }
            tracker.observe(symbol, closed_window(candles), reference_closed);
            if let Some(shift) = tracker.shift(symbol) {
                shifts.push((symbol.as_str(), shift));
            }
        }

        let universe: HashSet<&str> = snapshot.symbols.keys().map(String::as_str).collect();
        tracker.retain_symbols(&universe);
        drop(tracker);

        let thresholds = self.config.correlation;
        let (symbol, strongest) = shifts
            .iter()
            .max_by(|a, b| a.1.delta().total_cmp(&b.1.delta()))
            .copied()?;
        let severity = Severity::classify(strongest.delta(), thresholds.warning, thresholds.critical)?;

        let mut offenders: Vec<_> = shifts
            .iter()
            .filter(|(_, shift)| shift.delta() > thresholds.warning)
            .map(|(s, shift)| json!({ "symbol": s, "delta": shift.delta() }))
            .collect();
        offenders.sort_by(|a, b| a["symbol"].as_str().cmp(&b["symbol"].as_str()));

        Some(Warning::new(
            WarningType::CorrelationSpike,
            severity,
            format!(
                "{} correlation with {} shifted by {:.2} ({:.2} -> {:.2})",
                symbol,
                self.config.reference_symbol,
                strongest.delta(),
                strongest.previous,
                strongest.current
            ),
            strongest.delta(),
            tier_threshold(thresholds, severity),
            json!({
                "symbol": symbol,
                "current": strongest.current,
                "previous": strongest.previous,
                "window": self.config.correlation_window,
                "offenders": offenders,
            }),
        ))
    }

    /// Pause on CRITICAL, then persist, then alert. Failures after the pause
    /// are logged and do not undo it.
    async fn raise(&self, warning: &Warning) {
        if warning.is_critical() {
            error!(
                warning_type = %warning.warning_type,
                value = warning.triggered_value,
                threshold = warning.threshold,
                message = %warning.message,
                "CRITICAL market warning"
            );
            self.gate
                .pause(format!("CRITICAL_WARNING: {} - {}", warning.warning_type, warning.message))
                .await;
        } else {
            warn!(
                warning_type = %warning.warning_type,
                value = warning.triggered_value,
                threshold = warning.threshold,
                message = %warning.message,
                "Market warning"
            );
        }

        if let Err(e) = self.storage.append(warning).await {
            error!(warning_id = %warning.id, error = %e, "Failed to persist warning");
        }

        if let Some(alerts) = &self.alerts {
            deliver_best_effort(alerts.as_ref(), &format_warning_alert(warning), warning.severity.into()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warnings::InMemoryWarningStorage;
    use common::{AlertLevel, MemoryAlertChannel};
    use data_ingestion::candles_from_closes;

    fn detector() -> (AnomalyDetector, Arc<OrchestrationGate>, Arc<InMemoryWarningStorage>) {
        let gate = Arc::new(OrchestrationGate::new());
        let storage = Arc::new(InMemoryWarningStorage::new());
        let detector = AnomalyDetector::new(DetectorConfig::default(), gate.clone(), storage.clone());
        (detector, gate, storage)
    }

    fn snapshot(reference: &[f64], symbols: &[(&str, &[f64])]) -> MarketSnapshot {
        MarketSnapshot {
            timeframe: "1h".to_string(),
            reference: candles_from_closes("BTCUSDT", "1h", reference, 0),
            symbols: symbols
                .iter()
                .map(|(s, closes)| (s.to_string(), candles_from_closes(s, "1h", closes, 0)))
                .collect(),
        }
    }

    #[test]
    fn test_shock_severity_tiers() {
        let (detector, _, _) = detector();

        let warning = detector
            .check_reference_shock(&candles_from_closes("BTCUSDT", "1h", &[100.0, 94.02], 0))
            .unwrap();
        assert_eq!(warning.severity, Severity::Warning);
        assert!((warning.triggered_value - 0.0598).abs() < 1e-9);
        assert_eq!(warning.threshold, 0.05);
        assert_eq!(warning.metadata["direction"], "down");

        let warning = detector
            .check_reference_shock(&candles_from_closes("BTCUSDT", "1h", &[100.0, 108.1], 0))
            .unwrap();
        assert_eq!(warning.severity, Severity::Critical);
        assert_eq!(warning.threshold, 0.08);
        assert!(warning.message.contains("up by 8.10%"));

        assert!(detector
            .check_reference_shock(&candles_from_closes("BTCUSDT", "1h", &[100.0, 103.0], 0))
            .is_none());
        assert!(detector
            .check_reference_shock(&candles_from_closes("BTCUSDT", "1h", &[100.0], 0))
            .is_none());
    }

    #[test]
    fn test_breadth_counts_only_directional_symbols() {
        let (detector, _, _) = detector();
        // Reference up 2%: three against, two with, one flat
        let snap = snapshot(
            &[100.0, 102.0],
            &[
                ("ETHUSDT", &[100.0, 98.0]),
                ("SOLUSDT", &[100.0, 97.0]),
                ("XRPUSDT", &[100.0, 99.0]),
                ("ADAUSDT", &[100.0, 101.0]),
                ("BNBUSDT", &[100.0, 102.0]),
                ("DOTUSDT", &[100.0, 100.1]),
                ("BTCUSDT", &[100.0, 102.0]),
            ],
        );

        let warning = detector.check_breadth_collapse(&snap).unwrap();
        assert_eq!(warning.severity, Severity::Critical);
        assert!((warning.triggered_value - 0.6).abs() < 1e-9);
        assert_eq!(warning.metadata["directional"], 5);
        assert_eq!(warning.metadata["no_direction"], 1);
    }

    #[test]
    fn test_breadth_warning_tier_and_neutral_reference() {
        let (detector, _, _) = detector();
        let against_two_of_five: &[(&str, &[f64])] = &[
            ("ETHUSDT", &[100.0, 98.0]),
            ("SOLUSDT", &[100.0, 97.0]),
            ("ADAUSDT", &[100.0, 101.0]),
            ("BNBUSDT", &[100.0, 102.0]),
            ("XRPUSDT", &[100.0, 103.0]),
        ];

        // 2 of 5 is exactly 40%, not above it
        assert!(detector
            .check_breadth_collapse(&snapshot(&[100.0, 102.0], against_two_of_five))
            .is_none());

        let mut symbols = against_two_of_five.to_vec();
        symbols.push(("DOTUSDT", &[100.0, 95.0]));
        let warning = detector.check_breadth_collapse(&snapshot(&[100.0, 102.0], &symbols)).unwrap();
        assert_eq!(warning.severity, Severity::Warning);

        // Flat reference: no trend to compare against
        assert!(detector.check_breadth_collapse(&snapshot(&[100.0, 100.2], &symbols)).is_none());
    }

    #[tokio::test]
    async fn test_correlation_spike_needs_two_windows() {
        let (detector, _, _) = detector();
        let window = detector.config().correlation_window;

        // Reference alternates; the symbol tracks it, then inverts it.
        let reference: Vec<f64> = (0..=2 * window + 1)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 + (i % 3) as f64 })
            .collect();
        let mut symbol = vec![50.0];
        for i in 1..reference.len() {
            let r = reference[i] / reference[i - 1] - 1.0;
            let r = if i <= window { r } else { -r };
            let last = *symbol.last().unwrap();
            symbol.push(last * (1.0 + r));
        }

        let short = snapshot(&reference[..window], &[("ETHUSDT", &symbol[..window])]);
        assert!(detector.check_correlation_spike(&short).await.is_none());

        let full = snapshot(&reference, &[("ETHUSDT", &symbol)]);
        let warning = detector.check_correlation_spike(&full).await.unwrap();
        assert_eq!(warning.severity, Severity::Critical);
        assert!(warning.triggered_value > 0.5);
        assert_eq!(warning.metadata["symbol"], "ETHUSDT");
        assert_eq!(warning.metadata["offenders"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_critical_warning_pauses_gate() {
        let (detector, gate, storage) = detector();
        let alerts = Arc::new(MemoryAlertChannel::new());
        let detector = detector.with_alerts(alerts.clone());

        let warnings = detector.evaluate(&snapshot(&[100.0, 91.0], &[])).await;

        assert_eq!(warnings.len(), 1);
        assert!(gate.is_paused().await);
        let reason = gate.reason().await.unwrap();
        assert!(reason.starts_with("CRITICAL_WARNING: BTC_SHOCK - "));
        assert_eq!(storage.count().await.unwrap(), 1);
        assert_eq!(alerts.delivered().await[0].1, AlertLevel::Critical);
    }

    #[tokio::test]
    async fn test_warning_severity_leaves_gate_open() {
        let (detector, gate, storage) = detector();

        let warnings = detector.evaluate(&snapshot(&[100.0, 106.0], &[])).await;

        assert_eq!(warnings.len(), 1);
        assert!(!gate.is_paused().await);
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_skipped() {
        let (detector, gate, storage) = detector();
        let snap = MarketSnapshot {
            timeframe: "1h".to_string(),
            reference: Vec::new(),
            symbols: HashMap::from([("ETHUSDT".to_string(), candles_from_closes("ETHUSDT", "1h", &[1.0, 2.0], 0))]),
        };

        assert!(detector.evaluate(&snap).await.is_empty());
        assert!(!gate.is_paused().await);
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_alert_does_not_block_persistence() {
        let (detector, gate, storage) = detector();
        let detector = detector.with_alerts(Arc::new(MemoryAlertChannel::failing()));

        detector.evaluate(&snapshot(&[100.0, 110.0], &[])).await;

        assert!(gate.is_paused().await);
        assert_eq!(storage.count().await.unwrap(), 1);
    }
}
