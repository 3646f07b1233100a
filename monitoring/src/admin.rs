// Administrative control surface
// Operator pause/resume/status/reset, directly or through a command channel

use crate::service::ServiceStats;
use anyhow::Result;
use common::PauseStatus;
use risk_control::OrchestrationGate;
use serde::Serialize;
use signal_generation::{CandleLedger, SignalStorage};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Snapshot returned by `get_status`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub pause: PauseStatus,
    pub stats: ServiceStats,
    /// Number of (symbol, timeframe) keys in the ledger
    pub tracked_candles: usize,
    pub signals_stored: usize,
}

/// Operations bound to the shared gate, ledger and signal log
pub struct AdminControl {
    gate: Arc<OrchestrationGate>,
    ledger: Arc<dyn CandleLedger>,
    storage: Arc<dyn SignalStorage>,
    stats: Arc<RwLock<ServiceStats>>,
}

impl AdminControl {
    pub fn new(
        gate: Arc<OrchestrationGate>,
        ledger: Arc<dyn CandleLedger>,
        storage: Arc<dyn SignalStorage>,
        stats: Arc<RwLock<ServiceStats>>,
    ) -> Self {
        Self {
            gate,
            ledger,
            storage,
            stats,
        }
    }

    /// Suppress emission until `resume`. False if already paused.
    pub async fn pause(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        info!(reason = %reason, "Operator pause requested");
        self.gate.pause(reason).await
    }

    /// False if the gate was not paused
    pub async fn resume(&self) -> bool {
        info!("Operator resume requested");
        self.gate.resume().await
    }

    pub async fn get_status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            pause: self.gate.status().await,
            stats: self.stats.read().await.clone(),
            tracked_candles: self.ledger.count().await?,
            signals_stored: self.storage.count().await?,
        })
    }

    /// Forget every processed candle. Candles already signalled are
    /// re-scored but the signal log's fence skips them without an alert.
    pub async fn reset_ledger(&self) -> Result<()> {
        warn!("Operator ledger reset requested");
        self.ledger.reset().await
    }

    /// Apply one command from the control channel
    pub async fn handle(&self, cmd: ControlCommand) -> Result<()> {
        match cmd {
            ControlCommand::Pause { reason } => {
                self.pause(reason).await;
            }

            ControlCommand::Resume => {
                self.resume().await;
            }

            ControlCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status().await).await;
            }

            ControlCommand::ResetLedger { respond_to } => {
                let _ = respond_to.send(self.reset_ledger().await).await;
            }
        }

        Ok(())
    }
}

/// Commands to control the running scanner
pub enum ControlCommand {
    Pause {
        reason: String,
    },
    Resume,
    GetStatus {
        respond_to: mpsc::Sender<Result<ServiceStatus>>,
    },
    ResetLedger {
        respond_to: mpsc::Sender<Result<()>>,
    },
}

/// Handle for controlling the scanner
#[derive(Clone)]
pub struct AdminHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl AdminHandle {
    pub fn new(tx: mpsc::Sender<ControlCommand>) -> Self {
        Self { tx }
    }

    /// Pause signal emission
    pub async fn pause(&self, reason: impl Into<String>) -> Result<()> {
        self.tx
            .send(ControlCommand::Pause { reason: reason.into() })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send pause command: {}", e))
    }

    /// Resume signal emission
    pub async fn resume(&self) -> Result<()> {
        self.tx
            .send(ControlCommand::Resume)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send resume command: {}", e))
    }

    /// Get the current status
    pub async fn get_status(&self) -> Result<ServiceStatus> {
        let (tx, mut rx) = mpsc::channel(1);
        self.tx
            .send(ControlCommand::GetStatus { respond_to: tx })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get status: {}", e))?;

        rx.recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("Status response channel closed"))?
    }

    /// Clear the candle ledger
    pub async fn reset_ledger(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);
        self.tx
            .send(ControlCommand::ResetLedger { respond_to: tx })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reset ledger: {}", e))?;

        rx.recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("Reset response channel closed"))?
    }
}
