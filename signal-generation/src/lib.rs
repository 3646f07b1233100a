// Signal Generation Framework (Layer 2)
// Turns closed candles into deduplicated, confluence-gated trade signals

pub mod confluence;
pub mod evidence;
pub mod indicators;
pub mod ledger;
pub mod pipeline;
pub mod scoring;
pub mod storage;

pub use confluence::{BlockReason, ConfluenceConfig, ConfluenceDecision, ConfluenceScorer, ConfluenceVerdict};
pub use evidence::{build_evidence, Evidence, TrendRule};
pub use ledger::{CandleLedger, InMemoryLedger, MarkOutcome, PgCandleLedger};
pub use pipeline::{format_signal_alert, CycleOutcome, CycleReport, PipelineConfig, SignalPipeline};
pub use scoring::{price_levels, BaseScore, PriceLevels, ScoreComponents, TechnicalScorer};
pub use storage::{InMemorySignalStorage, PgSignalStorage, SignalStorage};
