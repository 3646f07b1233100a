// Periodic summary
// Aggregates the signal and warning logs over a reporting period

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{Severity, Signal};
use risk_control::WarningStorage;
use serde::{Deserialize, Serialize};
use signal_generation::SignalStorage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Signals listed in the summary, best confidence first
pub const TOP_SIGNALS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_reports_enabled")]
    pub enabled: bool,
    /// Length of each reporting period
    #[serde(default = "default_report_interval_secs")]
    pub interval_secs: u64,
}

fn default_reports_enabled() -> bool {
    true
}

fn default_report_interval_secs() -> u64 {
    86_400
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: default_reports_enabled(),
            interval_secs: default_report_interval_secs(),
        }
    }
}

/// Activity over `[period_start, period_end)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_signals: usize,
    pub signals_by_side: BTreeMap<String, usize>,
    pub avg_confidence: f64,
    pub warnings_triggered: usize,
    pub warnings_by_severity: BTreeMap<String, usize>,
    /// Messages of CRITICAL warnings, oldest first
    pub critical_events: Vec<String>,
    pub top_signals: Vec<Signal>,
    pub universe_size: usize,
}

/// Builds summaries from the persisted logs
pub struct SummaryReporter {
    signals: Arc<dyn SignalStorage>,
    warnings: Arc<dyn WarningStorage>,
}

impl SummaryReporter {
    pub fn new(signals: Arc<dyn SignalStorage>, warnings: Arc<dyn WarningStorage>) -> Self {
        Self { signals, warnings }
    }

    pub async fn summarize(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        universe_size: usize,
    ) -> Result<SummaryReport> {
        let signals = self
            .signals
            .between(period_start, period_end)
            .await
            .context("Failed to load signals for summary")?;
        let warnings = self
            .warnings
            .between(period_start, period_end)
            .await
            .context("Failed to load warnings for summary")?;

        let mut signals_by_side = BTreeMap::new();
        for s in &signals {
            *signals_by_side.entry(s.side.to_string()).or_insert(0) += 1;
        }
        let avg_confidence = if signals.is_empty() {
            0.0
        } else {
            signals.iter().map(|s| s.confidence).sum::<f64>() / signals.len() as f64
        };

        let mut top_signals = signals.clone();
        top_signals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        top_signals.truncate(TOP_SIGNALS);

        let mut warnings_by_severity = BTreeMap::new();
        for w in &warnings {
            *warnings_by_severity.entry(w.severity.as_str().to_string()).or_insert(0) += 1;
        }
        let critical_events = warnings
            .iter()
            .rev()
            .filter(|w| w.severity == Severity::Critical)
            .map(|w| w.message.clone())
            .collect();

        Ok(SummaryReport {
            period_start,
            period_end,
            total_signals: signals.len(),
            signals_by_side,
            avg_confidence,
            warnings_triggered: warnings.len(),
            warnings_by_severity,
            critical_events,
            top_signals,
            universe_size,
        })
    }

    /// Summary of one UTC calendar day
    pub async fn summarize_day(&self, date: NaiveDate, universe_size: usize) -> Result<SummaryReport> {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        self.summarize(start, start + Duration::days(1), universe_size).await
    }
}

/// Render a summary for the alert channel
pub fn format_summary(report: &SummaryReport) -> String {
    let mut lines = vec![format!(
        "Summary {} .. {} ({} symbols)",
        report.period_start.format("%Y-%m-%d %H:%M"),
        report.period_end.format("%Y-%m-%d %H:%M"),
        report.universe_size
    )];

    let sides: Vec<String> = report.signals_by_side.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
    if sides.is_empty() {
        lines.push(format!("signals: {}", report.total_signals));
    } else {
        lines.push(format!(
            "signals: {} ({}) | avg confidence {:.0}%",
            report.total_signals,
            sides.join(", "),
            report.avg_confidence * 100.0
        ));
    }

    let severities: Vec<String> = report
        .warnings_by_severity
        .iter()
        .map(|(k, v)| format!("{} {}", k, v))
        .collect();
    if severities.is_empty() {
        lines.push(format!("warnings: {}", report.warnings_triggered));
    } else {
        lines.push(format!("warnings: {} ({})", report.warnings_triggered, severities.join(", ")));
    }

    for event in &report.critical_events {
        lines.push(format!("critical: {}", event));
    }
    for s in &report.top_signals {
        lines.push(format!(
            "top: {} {} {} {:.0}%",
            s.side,
            s.symbol,
            s.timeframe,
            s.confidence * 100.0
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Side, Uuid, Warning, WarningType};
    use risk_control::InMemoryWarningStorage;
    use rust_decimal::Decimal;
    use serde_json::json;
    use signal_generation::InMemorySignalStorage;

    fn signal(symbol: &str, side: Side, confidence: f64, created_at: DateTime<Utc>) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            side,
            score: confidence * 10.0,
            confidence,
            entry_price: Decimal::new(100, 0),
            stop_loss: Decimal::new(97, 0),
            take_profit: Decimal::new(106, 0),
            reasons: vec![],
            created_at,
            source_candle_ts: created_at.timestamp_millis(),
        }
    }

    fn warning(severity: Severity, message: &str, created_at: DateTime<Utc>) -> Warning {
        let mut w = Warning::new(WarningType::BtcShock, severity, message, 0.09, 0.08, json!({}));
        w.created_at = created_at;
        w
    }

    async fn reporter() -> (SummaryReporter, DateTime<Utc>) {
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let noon = day.and_hms_opt(12, 0, 0).unwrap().and_utc();

        let signals = Arc::new(InMemorySignalStorage::new());
        for (symbol, side, confidence, offset_h) in [
            ("ETHUSDT", Side::Long, 0.9, 0),
            ("SOLUSDT", Side::Long, 0.7, 1),
            ("XRPUSDT", Side::Short, 0.8, 2),
            ("BNBUSDT", Side::Long, 0.95, 30),
        ] {
            signals
                .store(&signal(symbol, side, confidence, noon + Duration::hours(offset_h)))
                .await
                .unwrap();
        }

        let warnings = Arc::new(InMemoryWarningStorage::new());
        warnings.append(&warning(Severity::Warning, "BTC moved 5.5%", noon)).await.unwrap();
        warnings
            .append(&warning(Severity::Critical, "BTC moved 9.0%", noon + Duration::hours(1)))
            .await
            .unwrap();
        warnings
            .append(&warning(Severity::Critical, "next day", noon + Duration::days(1)))
            .await
            .unwrap();

        (SummaryReporter::new(signals, warnings), noon)
    }

    #[tokio::test]
    async fn test_daily_summary_counts() {
        let (reporter, noon) = reporter().await;

        let report = reporter.summarize_day(noon.date_naive(), 5).await.unwrap();

        assert_eq!(report.total_signals, 3);
        assert_eq!(report.signals_by_side.get("LONG"), Some(&2));
        assert_eq!(report.signals_by_side.get("SHORT"), Some(&1));
        assert!((report.avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(report.warnings_triggered, 2);
        assert_eq!(report.warnings_by_severity.get("CRITICAL"), Some(&1));
        assert_eq!(report.critical_events, vec!["BTC moved 9.0%".to_string()]);
        let top: Vec<&str> = report.top_signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(top, vec!["ETHUSDT", "XRPUSDT", "SOLUSDT"]);
        assert_eq!(report.universe_size, 5);
    }

    #[tokio::test]
    async fn test_empty_period() {
        let (reporter, noon) = reporter().await;
        let start = noon - Duration::days(10);

        let report = reporter.summarize(start, start + Duration::days(1), 0).await.unwrap();

        assert_eq!(report.total_signals, 0);
        assert_eq!(report.avg_confidence, 0.0);
        assert!(report.top_signals.is_empty());
        assert!(format_summary(&report).contains("signals: 0"));
    }

    #[tokio::test]
    async fn test_format_summary() {
        let (reporter, noon) = reporter().await;
        let report = reporter.summarize_day(noon.date_naive(), 5).await.unwrap();

        let text = format_summary(&report);

        assert!(text.starts_with("Summary 2026-03-14 00:00 .. 2026-03-15 00:00 (5 symbols)"));
        assert!(text.contains("signals: 3 (LONG 2, SHORT 1) | avg confidence 80%"));
        assert!(text.contains("warnings: 2 (CRITICAL 1, WARNING 1)"));
        assert!(text.contains("critical: BTC moved 9.0%"));
        assert!(text.contains("top: LONG ETHUSDT 1h 90%"));
    }
}
