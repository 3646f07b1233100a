// Candle closure resolution
// The newest candle of any fetched window may still be forming and is never treated as closed

use crate::error::InsufficientData;
use crate::types::CandleRecord;

/// The closed candle of an ascending window: the second-to-last element.
///
/// Fails with `InsufficientData` when fewer than two candles are present,
/// including the single-candle case.
pub fn resolve_closed_candle(candles: &[CandleRecord]) -> Result<&CandleRecord, InsufficientData> {
    match candles.len() {
        n if n >= 2 => Ok(&candles[n - 2]),
        n => Err(InsufficientData::new("closed candle", 2, n)),
    }
}

/// Open time of the closed candle
pub fn closed_candle_ts(candles: &[CandleRecord]) -> Result<i64, InsufficientData> {
    resolve_closed_candle(candles).map(|c| c.open_time)
}

/// Every candle except the forming one. Empty for windows shorter than two.
pub fn closed_window(candles: &[CandleRecord]) -> &[CandleRecord] {
    if candles.len() < 2 {
        return &[];
    }
    &candles[..candles.len() - 1]
}
