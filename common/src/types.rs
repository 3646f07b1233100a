use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One OHLCV bar as returned by the market data provider.
///
/// `open_time` is the bar's opening timestamp in epoch milliseconds and is
/// the identity used by the candle ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candidate trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Side::Long),
            "SHORT" => Ok(Side::Short),
            other => Err(format!("unknown side {:?}", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendDirection {
    /// True when this trend points directly against `side`
    pub fn opposes(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (TrendDirection::Bearish, Side::Long) | (TrendDirection::Bullish, Side::Short)
        )
    }

    /// True when this trend points the same way as `side`
    pub fn supports(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (TrendDirection::Bullish, Side::Long) | (TrendDirection::Bearish, Side::Short)
        )
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Bullish => "bullish",
            TrendDirection::Bearish => "bearish",
            TrendDirection::Neutral => "neutral",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

impl VolatilityRegime {
    /// Classify from ATR expressed as a percentage of price.
    pub fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct > 5.0 {
            VolatilityRegime::High
        } else if atr_pct < 2.0 {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        }
    }
}

/// An emitted trading signal. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub side: Side,
    /// Final score after confluence penalties
    pub score: f64,
    /// Final score normalised to 0..1
    pub confidence: f64,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Open time of the closed candle this signal was derived from
    pub source_candle_ts: i64,
}

/// Ledger row: last fully processed closed candle per (symbol, timeframe)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedCandleState {
    pub symbol: String,
    pub timeframe: String,
    pub last_closed_ts: i64,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningType {
    BtcShock,
    BreadthCollapse,
    CorrelationSpike,
}

impl WarningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningType::BtcShock => "BTC_SHOCK",
            WarningType::BreadthCollapse => "BREADTH_COLLAPSE",
            WarningType::CorrelationSpike => "CORRELATION_SPIKE",
        }
    }
}

impl FromStr for WarningType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC_SHOCK" => Ok(WarningType::BtcShock),
            "BREADTH_COLLAPSE" => Ok(WarningType::BreadthCollapse),
            "CORRELATION_SPIKE" => Ok(WarningType::CorrelationSpike),
            other => Err(format!("unknown warning type {:?}", other)),
        }
    }
}

impl fmt::Display for WarningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Two-tier classification with strict comparisons: a value equal to a
    /// threshold does not reach that tier.
    pub fn classify(value: f64, warning_threshold: f64, critical_threshold: f64) -> Option<Self> {
        if value > critical_threshold {
            Some(Severity::Critical)
        } else if value > warning_threshold {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity {:?}", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market anomaly record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub id: Uuid,
    pub warning_type: WarningType,
    pub severity: Severity,
    pub message: String,
    pub triggered_value: f64,
    /// Threshold of the tier that was crossed
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Warning {
    pub fn new(
        warning_type: WarningType,
        severity: Severity,
        message: impl Into<String>,
        triggered_value: f64,
        threshold: f64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            warning_type,
            severity,
            message: message.into(),
            triggered_value,
            threshold,
            created_at: Utc::now(),
            metadata,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Snapshot of the orchestration gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseStatus {
    pub paused: bool,
    pub reason: Option<String>,
    pub since: Option<DateTime<Utc>>,
}
