// =============================================================================
// Decision — Auditable consolidated recommendation per instrument/horizon
// =============================================================================
//
// The externally visible output of the engine.  Exactly one active Decision
// exists per (instrument, horizon) key; superseded generations are archived
// into the bounded `history` list by the decision store.
//
// A new `id` marks a new generation (adoption or override).  Refreshes of a
// locked decision keep the same `id` and only bump `updated_at`, which is how
// the store tells "replace in place" apart from "archive the predecessor".
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DecisionKey, Direction, Horizon, Verdict};

/// Compact view of one contributing or dissenting signal, kept on the
/// decision for display and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub source_id: String,
    pub direction: Direction,
    pub confidence: f64,
    /// Trust weight the source carried at resolution time.
    pub weight: f64,
}

impl SignalSummary {
    /// Weighted contribution of this signal to its direction's score.
    pub fn contribution(&self) -> f64 {
        self.confidence * self.weight
    }
}

/// Immutable snapshot of a superseded decision generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// When this generation was replaced by its successor.
    pub superseded_at: DateTime<Utc>,
}

/// The engine's consolidated recommendation for one instrument/horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier of this decision generation (UUID v4).
    pub id: String,

    pub instrument_id: String,
    pub horizon: Horizon,

    pub verdict: Verdict,

    /// Normalized share of total conviction behind the verdict, in [0, 1].
    pub confidence: f64,

    /// Top contributing signals supporting the verdict, strongest first.
    pub reasons: Vec<String>,

    /// Signals that disagreed with the winning direction.
    pub conflicts: Vec<SignalSummary>,

    /// Whether the runner-up direction scored close enough to flag
    /// disagreement between sources.
    pub contested: bool,

    /// While in the future, the verdict may only change via the
    /// consecutive-confirmation override.  `None` means re-evaluable on the
    /// next cycle.
    pub locked_until: Option<DateTime<Utc>>,

    /// Candidate verdict accumulated by the confirmation counter.
    pub pending_verdict: Option<Verdict>,

    /// Consecutive cycles the pending verdict has been observed.
    pub pending_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Prior generations, oldest first, bounded by the store.
    #[serde(default)]
    pub history: Vec<DecisionSnapshot>,
}

impl Decision {
    pub fn key(&self) -> DecisionKey {
        DecisionKey::new(self.instrument_id.clone(), self.horizon)
    }

    /// Whether the decision is still inside its hold period.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Snapshot of this generation, taken when a successor replaces it.
    pub fn snapshot(&self, superseded_at: DateTime<Utc>) -> DecisionSnapshot {
        DecisionSnapshot {
            verdict: self.verdict,
            confidence: self.confidence,
            reasons: self.reasons.clone(),
            created_at: self.created_at,
            superseded_at,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
