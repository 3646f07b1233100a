// Rolling correlation against the reference asset
// Fixed-capacity return buffers per symbol, Pearson over two adjacent windows

use common::CandleRecord;
use statrs::statistics::Statistics;
use std::collections::{HashMap, HashSet, VecDeque};

/// Pearson correlation of two equally sized samples.
///
/// `None` when the samples differ in length, have fewer than two points, or
/// either side has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }

    let sx = xs.iter().std_dev();
    let sy = ys.iter().std_dev();
    if !sx.is_finite() || !sy.is_finite() || sx == 0.0 || sy == 0.0 {
        return None;
    }

    let r = xs.iter().covariance(ys.iter()) / (sx * sy);
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Correlation of the newest window against the one before it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationShift {
    pub current: f64,
    pub previous: f64,
}

impl CorrelationShift {
    pub fn delta(&self) -> f64 {
        (self.current - self.previous).abs()
    }
}

/// Circular buffer of (symbol return, reference return) pairs.
///
/// Holds at most two windows; older pairs are evicted.
#[derive(Debug, Clone)]
pub struct RollingCorrelation {
    window: usize,
    pairs: VecDeque<(f64, f64)>,
    last_ts: Option<i64>,
}

impl RollingCorrelation {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            pairs: VecDeque::with_capacity(window * 2),
            last_ts: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.window * 2
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn last_ts(&self) -> Option<i64> {
        self.last_ts
    }

    /// Append a return pair observed at `ts`. Pairs at or before the newest
    /// stored timestamp are ignored, so replays of the same candles are no-ops.
    pub fn push(&mut self, ts: i64, symbol_return: f64, reference_return: f64) -> bool {
        if self.last_ts.map_or(false, |last| ts <= last) {
            return false;
        }

        if self.pairs.len() == self.capacity() {
            self.pairs.pop_front();
        }
        self.pairs.push_back((symbol_return, reference_return));
        self.last_ts = Some(ts);
        true
    }

    fn window_correlation(&self, skip: usize) -> Option<f64> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.pairs.iter().skip(skip).take(self.window).copied().unzip();
        if xs.len() < self.window {
            return None;
        }
        pearson(&xs, &ys)
    }

    /// Correlation over the newest window
    pub fn current(&self) -> Option<f64> {
        let skip = self.pairs.len().checked_sub(self.window)?;
        self.window_correlation(skip)
    }

    /// Correlation over the window preceding the newest one
    pub fn previous(&self) -> Option<f64> {
        let skip = self.pairs.len().checked_sub(self.window * 2)?;
        self.window_correlation(skip)
    }

    /// Both windows, once the buffer is full
    pub fn shift(&self) -> Option<CorrelationShift> {
        Some(CorrelationShift {
            current: self.current()?,
            previous: self.previous()?,
        })
    }
}

/// Simple returns of `symbol` and `reference` aligned on open time.
///
/// Only timestamps present in both series contribute; a return is taken
/// between consecutive shared timestamps.
pub fn aligned_returns(symbol: &[CandleRecord], reference: &[CandleRecord]) -> Vec<(i64, f64, f64)> {
    let reference_closes: HashMap<i64, f64> = reference.iter().map(|c| (c.open_time, c.close)).collect();

    let mut shared: Vec<(i64, f64, f64)> = symbol
        .iter()
        .filter_map(|c| reference_closes.get(&c.open_time).map(|r| (c.open_time, c.close, *r)))
        .collect();
    shared.sort_by_key(|(ts, _, _)| *ts);

    shared
        .windows(2)
        .filter(|w| w[0].1 > 0.0 && w[0].2 > 0.0)
        .map(|w| (w[1].0, w[1].1 / w[0].1 - 1.0, w[1].2 / w[0].2 - 1.0))
        .collect()
}

/// Per-symbol rolling correlation buffers keyed by symbol
#[derive(Debug)]
pub struct CorrelationTracker {
    window: usize,
    buffers: HashMap<String, RollingCorrelation>,
}

impl CorrelationTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            buffers: HashMap::new(),
        }
    }

    /// Feed closed candles for `symbol` and the reference. Returns the number
    /// of new pairs stored.
    pub fn observe(&mut self, symbol: &str, symbol_closed: &[CandleRecord], reference_closed: &[CandleRecord]) -> usize {
        let window = self.window;
        let buffer = self
            .buffers
            .entry(symbol.to_string())
            .or_insert_with(|| RollingCorrelation::new(window));

        aligned_returns(symbol_closed, reference_closed)
            .into_iter()
            .filter(|(ts, sym_ret, ref_ret)| buffer.push(*ts, *sym_ret, *ref_ret))
            .count()
    }

    pub fn shift(&self, symbol: &str) -> Option<CorrelationShift> {
        self.buffers.get(symbol)?.shift()
    }

    /// Drop buffers for symbols no longer in the universe
    pub fn retain_symbols(&mut self, symbols: &HashSet<&str>) {
        self.buffers.retain(|symbol, _| symbols.contains(symbol.as_str()));
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(symbol: &str, ts: i64, close: f64) -> CandleRecord {
        CandleRecord {
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            open_time: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_pearson_extremes() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let up = [2.0, 4.0, 6.0, 8.0, 10.0];
        let down = [5.0, 4.0, 3.0, 2.0, 1.0];

        assert!((pearson(&xs, &up).unwrap() - 1.0).abs() < 1e-9);
        assert!((pearson(&xs, &down).unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(pearson(&xs, &[1.0; 5]), None);
        assert_eq!(pearson(&xs, &up[..3]), None);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut rolling = RollingCorrelation::new(3);
        for ts in 0..20 {
            rolling.push(ts, ts as f64, ts as f64);
        }
        assert_eq!(rolling.len(), 6);
        assert_eq!(rolling.last_ts(), Some(19));
    }

    #[test]
    fn test_push_ignores_stale_timestamps() {
        let mut rolling = RollingCorrelation::new(3);
        assert!(rolling.push(10, 0.1, 0.1));
        assert!(!rolling.push(10, 0.2, 0.2));
        assert!(!rolling.push(5, 0.2, 0.2));
        assert_eq!(rolling.len(), 1);
    }

    #[test]
    fn test_shift_needs_two_windows() {
        let mut rolling = RollingCorrelation::new(4);
        let pattern = [0.01, -0.02, 0.03, -0.01];

        for (i, r) in pattern.iter().enumerate() {
            rolling.push(i as i64, *r, *r);
        }
        assert!(rolling.current().is_some());
        assert!(rolling.shift().is_none());

        // Second window moves against the reference
        for (i, r) in pattern.iter().enumerate() {
            rolling.push(10 + i as i64, -*r, *r);
        }
        let shift = rolling.shift().unwrap();
        assert!((shift.previous - 1.0).abs() < 1e-9);
        assert!((shift.current + 1.0).abs() < 1e-9);
        assert!((shift.delta() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_aligned_returns_uses_shared_timestamps() {
        let symbol = vec![candle("ETH", 0, 10.0), candle("ETH", 1, 11.0), candle("ETH", 3, 12.1)];
        let reference = vec![candle("BTC", 0, 100.0), candle("BTC", 1, 110.0), candle("BTC", 2, 0.0), candle("BTC", 3, 99.0)];

        let returns = aligned_returns(&symbol, &reference);

        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0].0, 1);
        assert!((returns[0].1 - 0.1).abs() < 1e-9);
        assert!((returns[1].1 - 0.1).abs() < 1e-9);
        assert!((returns[1].2 + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_observe_is_idempotent() {
        let mut tracker = CorrelationTracker::new(3);
        let symbol: Vec<_> = (0..5).map(|i| candle("ETH", i, 10.0 + i as f64)).collect();
        let reference: Vec<_> = (0..5).map(|i| candle("BTC", i, 100.0 + i as f64)).collect();

        assert_eq!(tracker.observe("ETH", &symbol, &reference), 4);
        assert_eq!(tracker.observe("ETH", &symbol, &reference), 0);

        tracker.retain_symbols(&HashSet::from(["SOL"]));
        assert!(tracker.is_empty());
    }
}
