//! Market Risk Controls (Layer 3)
//!
//! Anomaly detection over the scanned universe and the orchestration gate
//! that suppresses signal emission after a critical anomaly.

pub mod config;
pub mod correlation;
pub mod detector;
pub mod gate;
pub mod warnings;

pub use config::{load_config, save_config, DetectorConfig, Thresholds};
pub use correlation::{pearson, CorrelationShift, CorrelationTracker, RollingCorrelation};
pub use detector::{format_warning_alert, short_term_direction, AnomalyDetector, MarketSnapshot};
pub use gate::OrchestrationGate;
pub use warnings::{InMemoryWarningStorage, PgWarningStorage, WarningStorage};
