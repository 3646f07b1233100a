//! Technical indicators over closed candle windows.
//!
//! All functions take ascending series and return the value at the newest
//! element, or `InsufficientData` when the window is too short.

use common::{CandleRecord, InsufficientData};

/// Exponential Moving Average, incremental.
///
/// Seeded with the simple average of the first `period` values, then
/// `value = α·price + (1−α)·prev` with `α = 2/(period+1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            count: 0,
            value: None,
        }
    }

    /// Feed one value. Returns the EMA once `period` values have been seen.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.count += 1;
        match self.value {
            Some(prev) => self.value = Some(self.alpha * price + (1.0 - self.alpha) * prev),
            None => {
                self.seed_sum += price;
                if self.count >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn is_warm(&self) -> bool {
        self.value.is_some()
    }
}

fn require(context: &str, required: usize, available: usize) -> Result<(), InsufficientData> {
    if available < required || required == 0 {
        return Err(InsufficientData::new(context, required.max(1), available));
    }
    Ok(())
}

/// EMA at the newest value
pub fn ema(values: &[f64], period: usize) -> Result<f64, InsufficientData> {
    require("ema", period, values.len())?;
    let mut ema = Ema::new(period);
    let mut last = None;
    for &v in values {
        last = ema.update(v);
    }
    last.ok_or_else(|| InsufficientData::new("ema", period, values.len()))
}

/// EMA values from index `period - 1` onwards
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut ema = Ema::new(period);
    values.iter().filter_map(|&v| ema.update(v)).collect()
}

/// Relative Strength Index from the simple average of the last `period`
/// changes. Flat prices give 50.
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, InsufficientData> {
    require("rsi", period + 1, closes.len())?;

    let recent = &closes[closes.len() - period - 1..];
    let (gains, losses) = recent.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let change = w[1] - w[0];
        (g + change.max(0.0), l + (-change).max(0.0))
    });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    let value = match (avg_gain > 0.0, avg_loss > 0.0) {
        (false, false) => 50.0,
        (true, false) => 100.0,
        (false, true) => 0.0,
        (true, true) => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    };
    Ok(value.clamp(0.0, 100.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal line and histogram
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Result<Macd, InsufficientData> {
    require("macd", slow + signal - 1, closes.len())?;

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    // Align both series on the newest value
    let offset = fast_series.len() - slow_series.len();
    let macd_series: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let macd_line = *macd_series
        .last()
        .ok_or_else(|| InsufficientData::new("macd", slow + signal - 1, closes.len()))?;
    let signal_line = ema(&macd_series, signal)?;

    Ok(Macd {
        macd: macd_line,
        signal: signal_line,
        histogram: macd_line - signal_line,
    })
}

/// Average True Range as a simple mean of the last `period` true ranges
pub fn atr(candles: &[CandleRecord], period: usize) -> Result<f64, InsufficientData> {
    require("atr", period + 1, candles.len())?;

    let recent = &candles[candles.len() - period - 1..];
    let total: f64 = recent
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .sum();

    Ok((total / period as f64).max(0.0))
}

/// ATR as a percentage of the newest close
pub fn atr_percent(candles: &[CandleRecord], period: usize) -> Result<f64, InsufficientData> {
    let value = atr(candles, period)?;
    let last_close = candles.last().map(|c| c.close).unwrap_or_default();
    if last_close <= 0.0 {
        return Ok(0.0);
    }
    Ok(value / last_close * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Where the newest close sits in the band, 0 = lower, 1 = upper
    pub position: f64,
}

/// Bollinger bands with population standard deviation
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Result<Bollinger, InsufficientData> {
    require("bollinger", period, closes.len())?;

    let recent = &closes[closes.len() - period..];
    let middle = recent.iter().sum::<f64>() / period as f64;
    let variance = recent.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + width * std_dev;
    let lower = middle - width * std_dev;
    let price = recent[period - 1];
    let position = if upper > lower {
        (price - lower) / (upper - lower)
    } else {
        0.5
    };

    Ok(Bollinger {
        upper,
        middle,
        lower,
        position,
    })
}

/// Z-score of the newest volume against the last `period` volumes
pub fn volume_zscore(volumes: &[f64], period: usize) -> Result<f64, InsufficientData> {
    require("volume z-score", period, volumes.len())?;

    let recent = &volumes[volumes.len() - period..];
    let mean = recent.iter().sum::<f64>() / period as f64;
    let variance = recent.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return Ok(0.0);
    }
    Ok((recent[period - 1] - mean) / std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_ingestion::candles_from_closes;

    #[test]
    fn test_ema_seeded_with_sma() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(1.0), None);
        assert_eq!(ema.update(2.0), None);
        assert_eq!(ema.update(3.0), Some(2.0));
        // alpha = 0.5: 0.5*6 + 0.5*2
        assert_eq!(ema.update(6.0), Some(4.0));
        assert!(ema.is_warm());

        assert_eq!(ema_series(&[1.0, 2.0, 3.0, 6.0], 3), vec![2.0, 4.0]);
        assert!(super::ema(&[1.0, 2.0], 3).is_err());
    }

    #[test]
    fn test_rsi_edges() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let flat = vec![5.0; 20];

        assert_eq!(rsi(&rising, 14).unwrap(), 100.0);
        assert_eq!(rsi(&falling, 14).unwrap(), 0.0);
        assert_eq!(rsi(&flat, 14).unwrap(), 50.0);
        assert!(rsi(&flat[..14], 14).is_err());
    }

    #[test]
    fn test_rsi_mixed() {
        // Equal gains and losses
        let closes = [10.0, 11.0, 10.0, 11.0, 10.0];
        assert!((rsi(&closes, 4).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_direction() {
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).powf(1.5)).collect();
        let m = macd(&rising, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0);
        assert!(m.histogram > 0.0);
        assert!((m.histogram - (m.macd - m.signal)).abs() < 1e-12);

        assert!(macd(&rising[..33], 12, 26, 9).is_err());
        assert!(macd(&rising[..34], 12, 26, 9).is_ok());
    }

    #[test]
    fn test_atr_percent() {
        let candles = candles_from_closes("BTCUSDT", "1h", &[100.0; 20], 0);
        // Flat closes: true range is high - low = 100 * 0.002
        let value = atr_percent(&candles, 14).unwrap();
        assert!((value - 0.2).abs() < 1e-9);
        assert!(atr(&candles[..14], 14).is_err());
    }

    #[test]
    fn test_bollinger_position() {
        let mut closes = vec![100.0, 101.0].repeat(10);
        let mid = bollinger(&closes, 20, 2.0).unwrap();
        assert!(mid.position > 0.5 && mid.position < 1.0);

        closes.push(90.0);
        let low = bollinger(&closes, 20, 2.0).unwrap();
        assert!(low.position < 0.1);

        let flat = bollinger(&[5.0; 20], 20, 2.0).unwrap();
        assert_eq!(flat.position, 0.5);
    }

    #[test]
    fn test_volume_zscore() {
        let mut volumes = vec![1000.0, 1100.0].repeat(10);
        volumes.push(5000.0);
        assert!(volume_zscore(&volumes, 20).unwrap() > 2.0);
        assert_eq!(volume_zscore(&[7.0; 20], 20).unwrap(), 0.0);
    }
}
