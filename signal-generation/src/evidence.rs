// Indicator Evidence Builder
// Condenses a closed-candle window into trend, momentum and volatility for one timeframe

use crate::indicators::{atr_percent, ema, macd, rsi};
use common::{CandleRecord, InsufficientData, TrendDirection, VolatilityRegime};
use serde::{Deserialize, Serialize};

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

/// How a timeframe's trend is read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendRule {
    pub fast_ema: usize,
    pub slow_ema: usize,
    /// Require the MACD histogram to agree with the EMA cross
    pub confirm_with_macd: bool,
}

impl TrendRule {
    /// Entry timeframe: EMA20/EMA50 confirmed by MACD histogram
    pub const fn entry() -> Self {
        Self {
            fast_ema: 20,
            slow_ema: 50,
            confirm_with_macd: true,
        }
    }

    /// Context timeframe: EMA50/EMA200
    pub const fn context() -> Self {
        Self {
            fast_ema: 50,
            slow_ema: 200,
            confirm_with_macd: false,
        }
    }

    /// Closed candles needed before evidence can be built
    pub fn min_candles(&self) -> usize {
        let mut required = self.slow_ema.max(self.fast_ema).max(RSI_PERIOD + 1).max(ATR_PERIOD + 1);
        if self.confirm_with_macd {
            required = required.max(MACD_SLOW + MACD_SIGNAL - 1);
        }
        required
    }
}

/// Derived per-timeframe bundle. Recomputed every cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub timeframe: String,
    pub trend: TrendDirection,
    /// |RSI - 50| / 50, in 0..1
    pub momentum_strength: f64,
    pub volatility: VolatilityRegime,
    pub rsi: f64,
    pub atr_pct: f64,
    /// Open time of the newest candle the evidence was built from
    pub as_of_ts: i64,
}

/// Build evidence from `closed` candles only. The caller strips the forming
/// candle before calling.
pub fn build_evidence(timeframe: &str, closed: &[CandleRecord], rule: &TrendRule) -> Result<Evidence, InsufficientData> {
    let required = rule.min_candles();
    if closed.len() < required {
        return Err(InsufficientData::new(format!("{} evidence", timeframe), required, closed.len()));
    }

    let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
    let fast = ema(&closes, rule.fast_ema)?;
    let slow = ema(&closes, rule.slow_ema)?;

    let ema_trend = if fast > slow {
        TrendDirection::Bullish
    } else if fast < slow {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };

    let trend = if rule.confirm_with_macd {
        let histogram = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)?.histogram;
        match ema_trend {
            TrendDirection::Bullish if histogram > 0.0 => TrendDirection::Bullish,
            TrendDirection::Bearish if histogram < 0.0 => TrendDirection::Bearish,
            _ => TrendDirection::Neutral,
        }
    } else {
        ema_trend
    };

    let rsi_value = rsi(&closes, RSI_PERIOD)?;
    let atr_pct = atr_percent(closed, ATR_PERIOD)?;

    Ok(Evidence {
        timeframe: timeframe.to_string(),
        trend,
        momentum_strength: ((rsi_value - 50.0).abs() / 50.0).min(1.0),
        volatility: VolatilityRegime::from_atr_pct(atr_pct),
        rsi: rsi_value,
        atr_pct,
        as_of_ts: closed.last().map(|c| c.open_time).unwrap_or_default(),
    })
}
