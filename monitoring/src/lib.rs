//! Scanner service runtime: configuration, logging, alert delivery, the
//! administrative surface, the scan universe, periodic summaries and the
//! recurring tick loop.

pub mod admin;
pub mod alerts;
pub mod config;
pub mod logging;
pub mod reporting;
pub mod service;
pub mod universe;

pub use admin::{AdminControl, AdminHandle, ControlCommand, ServiceStatus};
pub use alerts::{LogAlertChannel, WebhookAlertChannel};
pub use crate::config::{AlertsConfig, AppConfig, ExchangeConfig, LoggingConfig};
pub use logging::init_logging;
pub use reporting::{format_summary, ReportConfig, SummaryReport, SummaryReporter};
pub use service::{ScannerService, ServiceStats};
pub use universe::{
    FilterStats, MarketFilter, RefreshReport, UniverseChanges, UniverseFilter, UniverseManager, UniverseRefreshConfig,
};
