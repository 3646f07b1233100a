//! Shared types for the candle signal scanner
//!
//! Every layer (ingestion, risk control, signal generation, monitoring)
//! speaks in terms of the records defined here.

pub mod alert;
pub mod closure;
pub mod error;
pub mod timeframe;
pub mod types;

pub use alert::{deliver_best_effort, AlertChannel, AlertLevel, MemoryAlertChannel};
pub use closure::{closed_candle_ts, closed_window, resolve_closed_candle};
pub use error::{FetchError, InsufficientData};
pub use timeframe::{is_known_timeframe, timeframe_millis};
pub use types::*;

pub use uuid::Uuid;
