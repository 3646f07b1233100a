use common::closed_candle_ts;
use data_ingestion::{MarketDataProvider, RestKlineConnector};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_max_level(tracing::Level::INFO).init();

    // Usage: fetch_klines <SYMBOL> [TIMEFRAME]
    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "BTCUSDT".to_string());
    let timeframe = args.next().unwrap_or_else(|| "1h".to_string());
    let base_url = std::env::var("SCANNER__EXCHANGE__BASE_URL")
        .unwrap_or_else(|_| RestKlineConnector::DEFAULT_BASE_URL.to_string());

    let connector = RestKlineConnector::new(base_url, Duration::from_secs(10))?;
    info!(base_url = connector.base_url(), symbol = %symbol, timeframe = %timeframe, "Fetching klines");

    let candles = connector.fetch_candles(&symbol, &timeframe, 5).await?;
    for candle in &candles {
        info!(
            open_time = candle.open_time,
            open = candle.open,
            high = candle.high,
            low = candle.low,
            close = candle.close,
            volume = candle.volume,
            "Candle"
        );
    }

    match closed_candle_ts(&candles) {
        Ok(ts) => info!(closed_ts = ts, "Last closed candle"),
        Err(e) => warn!(reason = %e, "No closed candle available"),
    }

    Ok(())
}
