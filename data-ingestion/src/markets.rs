// Market listing
// Tradable contracts with the 24h statistics used to build the scan universe

use common::FetchError;
use serde::{Deserialize, Serialize};

/// One listed contract. Fields the venue did not report are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    pub symbol: String,
    /// 24h traded volume in the quote asset
    pub quote_volume_24h: Option<f64>,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    /// Smallest order value the venue accepts
    pub min_notional: Option<f64>,
}

impl MarketTicker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quote_volume_24h: None,
            last_price: None,
            bid: None,
            ask: None,
            min_notional: None,
        }
    }

    /// Bid/ask spread as a percentage of the bid
    pub fn spread_percent(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Some((ask - bid) / bid * 100.0),
            _ => None,
        }
    }
}

/// Source of the tradable contract list
#[async_trait::async_trait]
pub trait MarketListing: Send + Sync {
    async fn list_markets(&self) -> Result<Vec<MarketTicker>, FetchError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_percent() {
        let mut ticker = MarketTicker::new("ETHUSDT");
        assert_eq!(ticker.spread_percent(), None);

        ticker.bid = Some(100.0);
        ticker.ask = Some(100.05);
        let spread = ticker.spread_percent().unwrap();
        assert!((spread - 0.05).abs() < 1e-9);

        ticker.bid = Some(0.0);
        assert_eq!(ticker.spread_percent(), None);
    }
}
