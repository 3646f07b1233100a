//! Market data ingestion (Layer 1)
//!
//! Candle providers consumed by the signal pipeline and anomaly detector,
//! and the contract listing the scan universe is built from.

pub mod connectors;
pub mod markets;
pub mod provider;

pub use connectors::{candles_from_closes, InMemoryProvider, RestKlineConnector};
pub use markets::{MarketListing, MarketTicker};
pub use provider::{MarketDataProvider, TimeoutProvider};
