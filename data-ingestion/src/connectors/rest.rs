// REST kline connector
// Pulls OHLCV candles and the contract listing from a Binance-futures compatible REST API

use crate::markets::{MarketListing, MarketTicker};
use crate::provider::MarketDataProvider;
use common::{CandleRecord, FetchError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Exchange maximum for a single klines request
const MAX_LIMIT: usize = 1500;

/// Kline connector over plain HTTPS
pub struct RestKlineConnector {
    client: Client,
    base_url: String,
}

impl RestKlineConnector {
    pub const DEFAULT_BASE_URL: &'static str = "https://fapi.binance.com";

    /// Create a connector against `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decode a klines response body.
    ///
    /// Each row is `[openTime, "open", "high", "low", "close", "volume", ...]`.
    /// Output is sorted by open time.
    pub fn parse_klines(symbol: &str, timeframe: &str, body: &Value) -> Result<Vec<CandleRecord>, FetchError> {
        let rows = body
            .as_array()
            .ok_or_else(|| FetchError::Decode(format!("expected array, got {}", body)))?;

        let mut candles = rows
            .iter()
            .map(|row| parse_row(symbol, timeframe, row))
            .collect::<Result<Vec<_>, _>>()?;

        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    /// Join `exchangeInfo`, `ticker/24hr` and `ticker/bookTicker` bodies into
    /// one ticker per trading perpetual contract, sorted by symbol.
    pub fn parse_markets(info: Value, tickers: Value, books: Value) -> Result<Vec<MarketTicker>, FetchError> {
        let info: ExchangeInfo = decode(info, "exchange info")?;
        let tickers: Vec<Ticker24h> = decode(tickers, "24h tickers")?;
        let books: Vec<BookTicker> = decode(books, "book tickers")?;

        let tickers: HashMap<String, Ticker24h> = tickers.into_iter().map(|t| (t.symbol.clone(), t)).collect();
        let books: HashMap<String, BookTicker> = books.into_iter().map(|b| (b.symbol.clone(), b)).collect();

        let mut markets: Vec<MarketTicker> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL")
            .map(|s| {
                let ticker = tickers.get(&s.symbol);
                let book = books.get(&s.symbol);
                MarketTicker {
                    min_notional: s.min_notional(),
                    quote_volume_24h: ticker.and_then(|t| lenient(&t.quote_volume)),
                    last_price: ticker.and_then(|t| lenient(&t.last_price)),
                    bid: book.and_then(|b| lenient(&b.bid_price)),
                    ask: book.and_then(|b| lenient(&b.ask_price)),
                    symbol: s.symbol,
                }
            })
            .collect();

        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(markets)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Transport(format!("HTTP {}: {}", status, body)));
        }

        response.json().await.map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    filters: Vec<Value>,
}

impl SymbolInfo {
    fn min_notional(&self) -> Option<f64> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some("MIN_NOTIONAL"))
            .and_then(|f| f.get("notional"))
            .and_then(|v| number(v).ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    #[serde(default)]
    last_price: String,
    #[serde(default)]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    symbol: String,
    #[serde(default)]
    bid_price: String,
    #[serde(default)]
    ask_price: String,
}

fn decode<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> Result<T, FetchError> {
    serde_json::from_value(body).map_err(|e| FetchError::Decode(format!("bad {}: {}", what, e)))
}

/// Unparseable statistics count as unreported
fn lenient(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok()
}

fn parse_row(symbol: &str, timeframe: &str, row: &Value) -> Result<CandleRecord, FetchError> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 6)
        .ok_or_else(|| FetchError::Decode(format!("malformed kline row: {}", row)))?;

    let open_time = fields[0]
        .as_i64()
        .ok_or_else(|| FetchError::Decode(format!("bad open time: {}", fields[0])))?;

    Ok(CandleRecord {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time,
        open: number(&fields[1])?,
        high: number(&fields[2])?,
        low: number(&fields[3])?,
        close: number(&fields[4])?,
        volume: number(&fields[5])?,
    })
}

/// Prices arrive as decimal strings; accept bare numbers too
fn number(value: &Value) -> Result<f64, FetchError> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| FetchError::Decode(format!("bad number {:?}: {}", s, e))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FetchError::Decode(format!("bad number {}", n))),
        other => Err(FetchError::Decode(format!("bad number {}", other))),
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for RestKlineConnector {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<CandleRecord>, FetchError> {
        let limit = limit.clamp(1, MAX_LIMIT).to_string();
        let body = self
            .get_json(
                "/fapi/v1/klines",
                &[("symbol", symbol), ("interval", timeframe), ("limit", limit.as_str())],
            )
            .await?;

        let candles = Self::parse_klines(symbol, timeframe, &body)?;
        debug!(symbol = %symbol, timeframe = %timeframe, count = candles.len(), "Fetched klines");

        Ok(candles)
    }

    fn name(&self) -> &str {
        "rest-klines"
    }
}

#[async_trait::async_trait]
impl MarketListing for RestKlineConnector {
    async fn list_markets(&self) -> Result<Vec<MarketTicker>, FetchError> {
        let (info, tickers, books) = tokio::try_join!(
            self.get_json("/fapi/v1/exchangeInfo", &[]),
            self.get_json("/fapi/v1/ticker/24hr", &[]),
            self.get_json("/fapi/v1/ticker/bookTicker", &[]),
        )?;

        let markets = Self::parse_markets(info, tickers, books)?;
        debug!(count = markets.len(), "Fetched market listing");
        Ok(markets)
    }

    fn name(&self) -> &str {
        "rest-listing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_klines_sorts_rows() {
        let body = json!([
            [1700003600000i64, "101.0", "103.0", "100.5", "102.0", "12.5", 1700007199999i64],
            [1700000000000i64, "100.0", "101.5", "99.0", "101.0", "10.0", 1700003599999i64]
        ]);

        let candles = RestKlineConnector::parse_klines("BTCUSDT", "1h", &body).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1700000000000);
        assert_eq!(candles[1].close, 102.0);
        assert_eq!(candles[1].volume, 12.5);
        assert_eq!(candles[0].timeframe, "1h");
    }

    #[test]
    fn test_parse_klines_rejects_malformed() {
        let not_array = json!({"code": -1121, "msg": "Invalid symbol."});
        assert!(matches!(
            RestKlineConnector::parse_klines("NOPE", "1h", &not_array),
            Err(FetchError::Decode(_))
        ));

        let short_row = json!([[1700000000000i64, "1.0"]]);
        assert!(RestKlineConnector::parse_klines("BTCUSDT", "1h", &short_row).is_err());

        let bad_price = json!([[1700000000000i64, "x", "1", "1", "1", "1"]]);
        assert!(RestKlineConnector::parse_klines("BTCUSDT", "1h", &bad_price).is_err());
    }

    #[test]
    fn test_parse_markets_joins_listing() {
        let info = json!({
            "symbols": [
                {"symbol": "ETHUSDT", "status": "TRADING", "contractType": "PERPETUAL",
                 "filters": [{"filterType": "PRICE_FILTER"}, {"filterType": "MIN_NOTIONAL", "notional": "20"}]},
                {"symbol": "BTCUSDT", "status": "TRADING", "contractType": "PERPETUAL", "filters": []},
                {"symbol": "BTCUSDT_260327", "status": "TRADING", "contractType": "CURRENT_QUARTER", "filters": []},
                {"symbol": "OLDUSDT", "status": "SETTLING", "contractType": "PERPETUAL", "filters": []}
            ]
        });
        let tickers = json!([
            {"symbol": "ETHUSDT", "lastPrice": "2500.10", "quoteVolume": "9000000000.5"},
            {"symbol": "BTCUSDT", "lastPrice": "64000", "quoteVolume": "n/a"}
        ]);
        let books = json!([
            {"symbol": "ETHUSDT", "bidPrice": "2500.00", "askPrice": "2500.20"}
        ]);

        let markets = RestKlineConnector::parse_markets(info, tickers, books).unwrap();

        let symbols: Vec<&str> = markets.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

        let btc = &markets[0];
        assert_eq!(btc.last_price, Some(64000.0));
        assert_eq!(btc.quote_volume_24h, None);
        assert_eq!(btc.bid, None);
        assert_eq!(btc.min_notional, None);

        let eth = &markets[1];
        assert_eq!(eth.min_notional, Some(20.0));
        assert_eq!(eth.bid, Some(2500.0));
        assert_eq!(eth.ask, Some(2500.2));
    }

    #[test]
    fn test_parse_markets_rejects_error_body() {
        let error = json!({"code": -1003, "msg": "Too many requests"});
        assert!(matches!(
            RestKlineConnector::parse_markets(json!({"symbols": []}), error, json!([])),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_base_url_is_normalised() {
        let connector = RestKlineConnector::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(connector.base_url(), "http://localhost:8080");
    }
}
