// Base technical scorer
// Scores the entry timeframe on a 0..10 scale and votes a candidate side

use crate::indicators::{atr_percent, bollinger, ema, macd, rsi, volume_zscore, Macd};
use common::{CandleRecord, InsufficientData, Side};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Upper bound of the base score
pub const MAX_BASE_SCORE: f64 = 10.0;

/// Closed candles required to score
pub const MIN_SCORING_CANDLES: usize = 50;

/// Per-indicator contributions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// 0..2
    pub rsi: f64,
    /// 0..2
    pub ema_alignment: f64,
    /// 0..2
    pub macd: f64,
    /// 0..2
    pub bollinger: f64,
    /// 0..1
    pub volume: f64,
    /// 0..1
    pub volatility: f64,
}

impl ScoreComponents {
    pub fn total(&self) -> f64 {
        self.rsi + self.ema_alignment + self.macd + self.bollinger + self.volume + self.volatility
    }
}

/// Result of scoring the entry timeframe
#[derive(Debug, Clone, PartialEq)]
pub struct BaseScore {
    pub total: f64,
    pub components: ScoreComponents,
    /// `None` when the indicator vote is tied
    pub side: Option<Side>,
    pub reasons: Vec<String>,
    pub last_close: f64,
    pub atr_pct: f64,
}

/// Entry, stop and target for an emitted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevels {
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

#[derive(Debug, Clone)]
pub struct TechnicalScorer {
    min_candles: usize,
}

impl TechnicalScorer {
    pub fn new() -> Self {
        Self {
            min_candles: MIN_SCORING_CANDLES,
        }
    }

    /// Score a window of closed candles
    pub fn score(&self, closed: &[CandleRecord]) -> Result<BaseScore, InsufficientData> {
        if closed.len() < self.min_candles {
            return Err(InsufficientData::new("base score", self.min_candles, closed.len()));
        }

        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = closed.iter().map(|c| c.volume).collect();
        let last_close = closes[closes.len() - 1];

        let rsi_14 = rsi(&closes, 14)?;
        let ema_20 = ema(&closes, 20)?;
        let ema_50 = ema(&closes, 50)?;
        let macd_now = macd(&closes, 12, 26, 9)?;
        let bands = bollinger(&closes, 20, 2.0)?;
        let vol_z = volume_zscore(&volumes, 20)?;
        let atr_pct = atr_percent(closed, 14)?;

        let components = ScoreComponents {
            rsi: score_rsi(rsi_14),
            ema_alignment: score_ema_alignment(last_close, ema_20, ema_50),
            macd: score_macd(&macd_now),
            bollinger: score_bollinger(bands.position),
            volume: score_volume(vol_z),
            volatility: score_volatility(atr_pct),
        };

        let mut reasons = Vec::new();
        if rsi_14 < 30.0 {
            reasons.push(format!("RSI oversold ({:.1})", rsi_14));
        } else if rsi_14 > 70.0 {
            reasons.push(format!("RSI overbought ({:.1})", rsi_14));
        }
        if components.ema_alignment > 0.0 {
            let vs_ema20 = (last_close - ema_20) / ema_20 * 100.0;
            reasons.push(format!("Price {:+.1}% vs EMA20", vs_ema20));
        }
        if components.macd > 0.0 {
            if macd_now.histogram > 0.0 {
                reasons.push("MACD bullish crossover".to_string());
            } else {
                reasons.push("MACD bearish crossover".to_string());
            }
        }
        if bands.position < 0.2 {
            reasons.push("Price near lower Bollinger Band".to_string());
        } else if bands.position > 0.8 {
            reasons.push("Price near upper Bollinger Band".to_string());
        }
        if components.volume > 0.0 {
            reasons.push(format!("High volume (z {:.2})", vol_z));
        }
        if components.volatility > 0.0 {
            reasons.push(format!("Tradable volatility ({:.1}% ATR)", atr_pct));
        }

        Ok(BaseScore {
            total: components.total().min(MAX_BASE_SCORE),
            components,
            side: vote_side(last_close, ema_20, ema_50, rsi_14, &macd_now),
            reasons,
            last_close,
            atr_pct,
        })
    }
}

impl Default for TechnicalScorer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn score_rsi(rsi: f64) -> f64 {
    match rsi {
        r if r < 25.0 => 2.0,
        r if r < 35.0 => 1.5,
        r if r < 45.0 => 0.5,
        r if r > 75.0 => 2.0,
        r if r > 65.0 => 1.5,
        r if r > 55.0 => 0.5,
        _ => 0.0,
    }
}

pub fn score_ema_alignment(price: f64, ema_20: f64, ema_50: f64) -> f64 {
    if ema_20 <= 0.0 || ema_50 <= 0.0 {
        return 0.0;
    }

    let price_vs_fast = (price - ema_20) / ema_20 * 100.0;
    let fast_vs_slow = (ema_20 - ema_50) / ema_50 * 100.0;

    if (price_vs_fast > 1.0 && fast_vs_slow > 0.5) || (price_vs_fast < -1.0 && fast_vs_slow < -0.5) {
        2.0
    } else if (price_vs_fast > 0.0 && fast_vs_slow > 0.0) || (price_vs_fast < 0.0 && fast_vs_slow < 0.0) {
        1.0
    } else {
        0.0
    }
}

pub fn score_macd(m: &Macd) -> f64 {
    let bullish = m.macd > m.signal && m.histogram > 0.0;
    let bearish = m.macd < m.signal && m.histogram < 0.0;

    match (bullish || bearish, m.histogram.abs() > 0.01) {
        (true, true) => 2.0,
        (true, false) => 1.0,
        _ => 0.0,
    }
}

pub fn score_bollinger(position: f64) -> f64 {
    match position {
        p if p < 0.1 => 2.0,
        p if p < 0.2 => 1.5,
        p if p > 0.9 => 2.0,
        p if p > 0.8 => 1.5,
        p if (0.4..=0.6).contains(&p) => 0.5,
        _ => 0.0,
    }
}

pub fn score_volume(zscore: f64) -> f64 {
    if zscore > 2.0 {
        1.0
    } else if zscore > 1.5 {
        0.5
    } else {
        0.0
    }
}

pub fn score_volatility(atr_pct: f64) -> f64 {
    if (2.0..=8.0).contains(&atr_pct) {
        1.0
    } else if (1.0..=12.0).contains(&atr_pct) {
        0.5
    } else {
        0.0
    }
}

/// Majority vote of EMA stack, RSI and MACD. Ties produce no side.
pub fn vote_side(price: f64, ema_20: f64, ema_50: f64, rsi: f64, m: &Macd) -> Option<Side> {
    let mut long = 0;
    let mut short = 0;

    if price > ema_20 && ema_20 > ema_50 {
        long += 1;
    } else if price < ema_20 && ema_20 < ema_50 {
        short += 1;
    }

    if rsi < 40.0 {
        long += 1;
    } else if rsi > 60.0 {
        short += 1;
    }

    if m.macd > m.signal {
        long += 1;
    } else if m.macd < m.signal {
        short += 1;
    }

    match long.cmp(&short) {
        std::cmp::Ordering::Greater => Some(Side::Long),
        std::cmp::Ordering::Less => Some(Side::Short),
        std::cmp::Ordering::Equal => None,
    }
}

/// Stop at 1.5 ATR and target at 3 ATR from `entry`
pub fn price_levels(entry: f64, atr_pct: f64, side: Side) -> PriceLevels {
    let atr_value = entry * atr_pct / 100.0;
    let (stop, target) = match side {
        Side::Long => (entry - atr_value * 1.5, entry + atr_value * 3.0),
        Side::Short => (entry + atr_value * 1.5, entry - atr_value * 3.0),
    };

    let to_decimal = |v: f64| Decimal::from_f64(v).unwrap_or(Decimal::ZERO).round_dp(8);
    PriceLevels {
        entry: to_decimal(entry),
        stop_loss: to_decimal(stop),
        take_profit: to_decimal(target),
    }
}
