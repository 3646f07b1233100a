//! Orchestration gate
//!
//! Process-wide pause switch consulted before every signal emission.
//! Owned explicitly and shared by `Arc`; there is no global instance.

use chrono::Utc;
use common::PauseStatus;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Pause/resume state shared by the pipeline driver and the anomaly detector
#[derive(Debug, Default)]
pub struct OrchestrationGate {
    state: RwLock<PauseStatus>,
}

impl OrchestrationGate {
    /// Create an unpaused gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause signal emission.
    ///
    /// Returns `true` if this call transitioned the gate. Pausing an already
    /// paused gate keeps the original reason and timestamp.
    pub async fn pause(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut state = self.state.write().await;

        if state.paused {
            warn!(
                current_reason = state.reason.as_deref().unwrap_or(""),
                ignored_reason = %reason,
                "Gate already paused"
            );
            return false;
        }

        let now = Utc::now();
        *state = PauseStatus {
            paused: true,
            reason: Some(reason.clone()),
            since: Some(now),
        };

        error!(reason = %reason, since = %now, "Signal emission PAUSED");
        true
    }

    /// Resume signal emission. Returns `true` if the gate was paused.
    pub async fn resume(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.paused {
            return false;
        }

        let previous = state.reason.take();
        *state = PauseStatus::default();

        info!(previous_reason = previous.as_deref().unwrap_or(""), "Signal emission resumed");
        true
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    pub async fn reason(&self) -> Option<String> {
        self.state.read().await.reason.clone()
    }

    pub async fn status(&self) -> PauseStatus {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_starts_unpaused() {
        let gate = OrchestrationGate::new();
        assert!(!gate.is_paused().await);
        assert_eq!(gate.status().await, PauseStatus::default());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let gate = OrchestrationGate::new();

        assert!(gate.pause("operator maintenance").await);
        assert!(gate.is_paused().await);
        let status = gate.status().await;
        assert_eq!(status.reason.as_deref(), Some("operator maintenance"));
        assert!(status.since.is_some());

        assert!(gate.resume().await);
        assert!(!gate.is_paused().await);
        assert_eq!(gate.reason().await, None);
        assert!(!gate.resume().await);
    }

    #[tokio::test]
    async fn test_repeat_pause_keeps_first_reason() {
        let gate = OrchestrationGate::new();
        gate.pause("first").await;
        let since = gate.status().await.since;

        assert!(!gate.pause("second").await);
        assert_eq!(gate.reason().await.as_deref(), Some("first"));
        assert_eq!(gate.status().await.since, since);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let gate = Arc::new(OrchestrationGate::new());
        let writer = gate.clone();

        tokio::spawn(async move { writer.pause("from task").await })
            .await
            .unwrap();

        assert!(gate.is_paused().await);
    }
}
