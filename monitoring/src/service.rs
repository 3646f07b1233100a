// Scanner service
// Recurring tick loop driving the signal pipeline, with universe refresh,
// periodic summaries, admin commands and graceful shutdown

use crate::admin::{AdminControl, AdminHandle, ControlCommand};
use crate::reporting::{format_summary, SummaryReport, SummaryReporter};
use crate::universe::UniverseManager;
use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{deliver_best_effort, AlertChannel, AlertLevel};
use serde::{Deserialize, Serialize};
use signal_generation::{CycleOutcome, CycleReport, SignalPipeline};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Running totals since process start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub cycles_run: u64,
    pub signals_emitted: u64,
    pub warnings_raised: u64,
    pub fetch_failures: u64,
    /// Persistence failures
    pub symbol_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_ms: Option<i64>,
    /// Symbols scanned by the last cycle
    pub universe_size: usize,
    pub universe_refreshes: u64,
    pub reports_sent: u64,
}

impl ServiceStats {
    fn record(&mut self, report: &CycleReport, elapsed_ms: i64) {
        self.cycles_run += 1;
        self.signals_emitted += report.signals().len() as u64;
        self.warnings_raised += report.warnings.len() as u64;
        self.fetch_failures += report.count(|o| matches!(o, CycleOutcome::FetchFailed(_))) as u64;
        self.symbol_failures += report.count(|o| matches!(o, CycleOutcome::Failed(_))) as u64;
        self.last_cycle_at = Some(report.started_at);
        self.last_cycle_ms = Some(elapsed_ms);
        self.universe_size = report.outcomes.len();
    }
}

struct Reports {
    reporter: Arc<SummaryReporter>,
    alerts: Arc<dyn AlertChannel>,
    period: Duration,
}

/// The scanner service
pub struct ScannerService {
    universe: Arc<UniverseManager>,
    tick_interval: Duration,
    pipeline: Arc<SignalPipeline>,
    stats: Arc<RwLock<ServiceStats>>,
    admin: AdminControl,
    reports: Option<Reports>,

    // Control channel
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlCommand>>>,
}

impl ScannerService {
    pub fn new(universe: Arc<UniverseManager>, tick_interval: Duration, pipeline: Arc<SignalPipeline>) -> Self {
        let stats = Arc::new(RwLock::new(ServiceStats::default()));
        let admin = AdminControl::new(
            pipeline.gate().clone(),
            pipeline.ledger().clone(),
            pipeline.storage().clone(),
            stats.clone(),
        );
        let (control_tx, control_rx) = mpsc::channel(32);

        Self {
            universe,
            tick_interval,
            pipeline,
            stats,
            admin,
            reports: None,
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        }
    }

    /// Send a summary of the last `period` to `alerts` every `period`
    pub fn with_reports(mut self, reporter: Arc<SummaryReporter>, alerts: Arc<dyn AlertChannel>, period: Duration) -> Self {
        info!(period_secs = period.as_secs(), channel = alerts.name(), "Setting summary reports");
        self.reports = Some(Reports {
            reporter,
            alerts,
            period,
        });
        self
    }

    pub fn universe(&self) -> &Arc<UniverseManager> {
        &self.universe
    }

    /// Direct access to the administrative operations
    pub fn admin(&self) -> &AdminControl {
        &self.admin
    }

    /// Get a handle to send control commands to the running loop
    pub fn control_handle(&self) -> AdminHandle {
        AdminHandle::new(self.control_tx.clone())
    }

    pub async fn stats(&self) -> ServiceStats {
        self.stats.read().await.clone()
    }

    /// Run one pipeline cycle over the universe and record it
    pub async fn tick(&self) -> CycleReport {
        let symbols = self.universe.symbols().await;
        let report = self.pipeline.run_cycle(&symbols).await;
        let elapsed_ms = (Utc::now() - report.started_at).num_milliseconds();

        let mut stats = self.stats.write().await;
        stats.record(&report, elapsed_ms);

        info!(
            cycle = stats.cycles_run,
            emitted = report.signals().len(),
            warnings = report.warnings.len(),
            fetch_failures = report.count(|o| matches!(o, CycleOutcome::FetchFailed(_))),
            suppressed = report.count(|o| matches!(o, CycleOutcome::Suppressed { .. })),
            elapsed_ms,
            "Tick complete"
        );
        report
    }

    /// Refresh the universe; failures keep the current one
    pub async fn refresh_universe(&self) {
        match self.universe.refresh().await {
            Ok(Some(_)) => {
                self.stats.write().await.universe_refreshes += 1;
            }
            Ok(None) => {}
            Err(e) => {
                let current = self.universe.len().await;
                error!(error = %format!("{:#}", e), symbols = current, "Universe refresh failed, keeping current universe");
            }
        }
    }

    /// Summarize the period ending now and deliver it. `None` when reports
    /// are not configured.
    pub async fn send_report(&self) -> Result<Option<SummaryReport>> {
        let Some(reports) = &self.reports else {
            return Ok(None);
        };

        let end = Utc::now();
        let period = chrono::Duration::from_std(reports.period)?;
        let summary = reports
            .reporter
            .summarize(end - period, end, self.universe.len().await)
            .await?;

        deliver_best_effort(reports.alerts.as_ref(), &format_summary(&summary), AlertLevel::Info).await;
        self.stats.write().await.reports_sent += 1;

        info!(
            signals = summary.total_signals,
            warnings = summary.warnings_triggered,
            critical = summary.critical_events.len(),
            "Summary report sent"
        );
        Ok(Some(summary))
    }

    /// Tick until `shutdown` resolves. A tick in progress finishes before
    /// the loop exits.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut control_rx = self
            .control_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("Scanner loop already running"))?;

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Disabled branches still need a timer; the tick period stands in
        let refresh_period = self.universe.refresh_interval();
        let mut refresh = tokio::time::interval(refresh_period.unwrap_or(self.tick_interval));
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let report_period = self.reports.as_ref().map(|r| r.period);
        let period = report_period.unwrap_or(self.tick_interval);
        let mut report_timer = tokio::time::interval_at(Instant::now() + period, period);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        let symbols = self.universe.len().await;
        info!(
            symbols,
            tick_interval_secs = self.tick_interval.as_secs_f64(),
            universe_refresh_secs = refresh_period.map(|d| d.as_secs()),
            report_secs = report_period.map(|d| d.as_secs()),
            "Scanner started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scanner");
                    break;
                }

                Some(cmd) = control_rx.recv() => {
                    if let Err(e) = self.admin.handle(cmd).await {
                        error!(error = %e, "Error handling control command");
                    }
                }

                _ = refresh.tick(), if refresh_period.is_some() => {
                    self.refresh_universe().await;
                }

                _ = report_timer.tick(), if report_period.is_some() => {
                    if let Err(e) = self.send_report().await {
                        warn!(error = %format!("{:#}", e), "Summary report failed");
                    }
                }

                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        *self.control_rx.lock().await = Some(control_rx);
        info!("Scanner stopped");
        Ok(())
    }
}
