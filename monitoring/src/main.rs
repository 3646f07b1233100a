use anyhow::{Context, Result};
use common::AlertChannel;
use data_ingestion::{MarketDataProvider, RestKlineConnector, TimeoutProvider};
use monitoring::{
    init_logging, AppConfig, LogAlertChannel, ScannerService, SummaryReporter, UniverseManager, WebhookAlertChannel,
};
use risk_control::{AnomalyDetector, InMemoryWarningStorage, OrchestrationGate, PgWarningStorage, WarningStorage};
use signal_generation::{
    CandleLedger, InMemoryLedger, InMemorySignalStorage, PgCandleLedger, PgSignalStorage, SignalPipeline,
    SignalStorage,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type Stores = (Arc<dyn CandleLedger>, Arc<dyn SignalStorage>, Arc<dyn WarningStorage>);

async fn open_stores(database_url: Option<&str>) -> Result<Stores> {
    let Some(url) = database_url else {
        warn!("No database_url configured; ledger and logs are in-memory and lost on restart");
        let ledger: Arc<dyn CandleLedger> = Arc::new(InMemoryLedger::new());
        let signals: Arc<dyn SignalStorage> = Arc::new(InMemorySignalStorage::new());
        let warnings: Arc<dyn WarningStorage> = Arc::new(InMemoryWarningStorage::new());
        return Ok((ledger, signals, warnings));
    };

    let pool = Arc::new(
        PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .context("Failed to connect to database")?,
    );

    let ledger = PgCandleLedger::new(pool.clone());
    ledger.initialize().await?;
    let signals = PgSignalStorage::new(pool.clone());
    signals.initialize().await?;
    let warnings = PgWarningStorage::new(pool);
    warnings.initialize().await?;

    info!("Connected to PostgreSQL");
    let ledger: Arc<dyn CandleLedger> = Arc::new(ledger);
    let signals: Arc<dyn SignalStorage> = Arc::new(signals);
    let warnings: Arc<dyn WarningStorage> = Arc::new(warnings);
    Ok((ledger, signals, warnings))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref())?;
    init_logging(&config.logging)?;

    info!(
        symbols = config.universe.len(),
        universe_refresh = config.universe_refresh.enabled,
        tick_interval_secs = config.tick_interval_secs,
        entry_timeframe = %config.pipeline.entry_timeframe,
        reference = %config.detector.reference_symbol,
        "Starting signal scanner"
    );

    let alerts: Arc<dyn AlertChannel> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(WebhookAlertChannel::new(
            url.as_str(),
            Duration::from_secs(config.alerts.timeout_secs),
        )?),
        None => {
            warn!("No webhook configured; alerts go to the log");
            Arc::new(LogAlertChannel)
        }
    };

    let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
    let connector = Arc::new(RestKlineConnector::new(config.exchange.base_url.as_str(), fetch_timeout)?);
    let provider: Arc<dyn MarketDataProvider> = Arc::new(TimeoutProvider::new(connector.clone(), fetch_timeout));

    let universe = if config.universe_refresh.enabled {
        UniverseManager::refreshing(config.universe.clone(), connector, &config.universe_refresh)?
    } else {
        UniverseManager::fixed(config.universe.clone())
    };

    let (ledger, signals, warnings) = open_stores(config.database_url.as_deref()).await?;

    let reporter = Arc::new(SummaryReporter::new(signals.clone(), warnings.clone()));

    let gate = Arc::new(OrchestrationGate::new());
    let detector = Arc::new(AnomalyDetector::new(config.detector.clone(), gate, warnings).with_alerts(alerts.clone()));
    let pipeline = Arc::new(
        SignalPipeline::new(config.pipeline.clone(), provider, detector)
            .with_ledger(ledger)
            .with_storage(signals)
            .with_alerts(alerts.clone()),
    );

    let mut service = ScannerService::new(
        Arc::new(universe),
        Duration::from_secs(config.tick_interval_secs),
        pipeline,
    );
    if config.reports.enabled {
        service = service.with_reports(reporter, alerts, Duration::from_secs(config.reports.interval_secs));
    }

    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = service.stats().await;
    info!(
        cycles = stats.cycles_run,
        signals = stats.signals_emitted,
        warnings = stats.warnings_raised,
        universe_refreshes = stats.universe_refreshes,
        "Signal scanner stopped"
    );
    Ok(())
}
