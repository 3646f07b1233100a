pub mod memory;
pub mod rest;

pub use memory::{candles_from_closes, InMemoryProvider};
pub use rest::RestKlineConnector;
