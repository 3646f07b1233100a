//! Multi-timeframe confluence scoring
//!
//! Combines per-timeframe evidence with a base technical score into one
//! gated decision. The entry timeframe can hard-block a candidate; slower
//! context timeframes can only apply soft penalties. Missing evidence for any
//! required timeframe fails closed.

use crate::evidence::Evidence;
use common::{Side, TrendDirection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Scoring constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    /// Applied when the entry trend opposes the candidate or evidence is missing
    #[serde(default = "default_hard_block_penalty")]
    pub hard_block_penalty: f64,

    /// Applied per context timeframe that does not support the candidate
    #[serde(default = "default_soft_penalty")]
    pub soft_penalty: f64,

    /// Minimum final score for emission
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            hard_block_penalty: default_hard_block_penalty(),
            soft_penalty: default_soft_penalty(),
            acceptance_threshold: default_acceptance_threshold(),
        }
    }
}

fn default_hard_block_penalty() -> f64 {
    -3.0
}

fn default_soft_penalty() -> f64 {
    -1.5
}

fn default_acceptance_threshold() -> f64 {
    7.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Entry timeframe trend points against the candidate side
    CounterTrendEntry,
    /// No evidence could be built for a required timeframe
    MissingEvidence { timeframe: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::CounterTrendEntry => f.write_str("counter-trend-entry"),
            BlockReason::MissingEvidence { timeframe } => write!(f, "missing-evidence:{}", timeframe),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceVerdict {
    pub aligned: bool,
    /// Sum of penalties, zero or negative
    pub penalty: f64,
    pub blocking_reason: Option<BlockReason>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceDecision {
    pub verdict: ConfluenceVerdict,
    pub base_score: f64,
    pub final_score: f64,
    pub accepted: bool,
}

/// Scorer bound to one entry timeframe and its context timeframes
#[derive(Debug, Clone)]
pub struct ConfluenceScorer {
    config: ConfluenceConfig,
    entry_timeframe: String,
    context_timeframes: Vec<String>,
}

impl ConfluenceScorer {
    pub fn new(config: ConfluenceConfig, entry_timeframe: impl Into<String>, context_timeframes: Vec<String>) -> Self {
        Self {
            config,
            entry_timeframe: entry_timeframe.into(),
            context_timeframes,
        }
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    fn blocked(&self, reason: BlockReason, note: String) -> ConfluenceVerdict {
        ConfluenceVerdict {
            aligned: false,
            penalty: self.config.hard_block_penalty,
            blocking_reason: Some(reason),
            notes: vec![note],
        }
    }

    /// Judge `side` against the available evidence, keyed by timeframe.
    pub fn evaluate(&self, side: Side, evidence: &HashMap<String, Evidence>) -> ConfluenceVerdict {
        let required = std::iter::once(&self.entry_timeframe).chain(self.context_timeframes.iter());
        for timeframe in required {
            if !evidence.contains_key(timeframe) {
                return self.blocked(
                    BlockReason::MissingEvidence {
                        timeframe: timeframe.clone(),
                    },
                    format!("no {} evidence", timeframe),
                );
            }
        }

        let mut penalty = 0.0;
        let mut notes = Vec::new();

        if let Some(entry) = evidence.get(&self.entry_timeframe) {
            if entry.trend.opposes(side) {
                return self.blocked(
                    BlockReason::CounterTrendEntry,
                    format!("{} {} trend against {}", self.entry_timeframe, entry.trend, side),
                );
            }
            if entry.trend == TrendDirection::Neutral {
                penalty += self.config.soft_penalty;
                notes.push(format!("{} trend neutral", self.entry_timeframe));
            }
        }

        for timeframe in &self.context_timeframes {
            let Some(context) = evidence.get(timeframe) else {
                continue;
            };
            if !context.trend.supports(side) {
                penalty += self.config.soft_penalty;
                notes.push(format!("{} {} trend: macro caution", timeframe, context.trend));
            }
        }

        ConfluenceVerdict {
            aligned: true,
            penalty,
            blocking_reason: None,
            notes,
        }
    }

    /// Verdict plus the acceptance decision for `base_score`
    pub fn decide(&self, base_score: f64, side: Side, evidence: &HashMap<String, Evidence>) -> ConfluenceDecision {
        let verdict = self.evaluate(side, evidence);
        let final_score = base_score + verdict.penalty;
        let accepted = verdict.aligned && final_score >= self.config.acceptance_threshold;

        ConfluenceDecision {
            verdict,
            base_score,
            final_score,
            accepted,
        }
    }
}
