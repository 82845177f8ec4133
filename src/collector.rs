// =============================================================================
// Signal Collector — Normalizes predictor opinions into Signal records
// =============================================================================
//
// The collector is the data-quality boundary of the engine.  Each registered
// predictor source is polled for its latest cached opinion; anything that
// fails validation is dropped and recorded as a DataQualityEvent, never
// propagated into the resolver and never fatal to the evaluation batch.
//
// Missing sources are omitted rather than defaulted to a neutral value, so
// downstream weighting naturally redistributes trust across the sources that
// did answer.
//
// Predictor calls never block on network I/O here: sources hand back
// opinions they have already computed (or None), so the trait is sync.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Direction, Horizon, Signal};

// =============================================================================
// Predictor source seam
// =============================================================================

/// Latest opinion a predictor holds for an instrument/horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub direction: Direction,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

/// An external predictor (technical analyzer, ML model, sentiment scorer).
///
/// Implementations return `None` when no opinion is available for the pair —
/// a timed-out or failed source simply has nothing to hand in.
pub trait PredictorSource: Send + Sync {
    /// Stable identifier, e.g. "technical", "lstm", "random_forest".
    fn source_id(&self) -> &str;

    fn opinion(&self, instrument_id: &str, horizon: Horizon) -> Option<Opinion>;
}

// =============================================================================
// Data-quality events
// =============================================================================

/// Why a source's opinion was excluded from a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQualityReason {
    /// The source had no opinion for this instrument/horizon.
    Unavailable,
    /// `observed_at` was older than one evaluation cycle.
    StaleObservation,
    /// Confidence was non-finite or outside [0, 1].
    ConfidenceOutOfRange,
}

impl std::fmt::Display for DataQualityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::StaleObservation => write!(f, "stale_observation"),
            Self::ConfidenceOutOfRange => write!(f, "confidence_out_of_range"),
        }
    }
}

/// A recorded drop, kept in the engine's audit ring and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityEvent {
    pub source_id: String,
    pub instrument_id: String,
    pub horizon: Horizon,
    pub reason: DataQualityReason,
    /// Timestamp of the rejected observation, when there was one.
    pub observed_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Result of one collection pass: usable signals plus everything dropped.
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub signals: Vec<Signal>,
    pub dropped: Vec<DataQualityEvent>,
}

// =============================================================================
// Signal Collector
// =============================================================================

pub struct SignalCollector {
    sources: Vec<Arc<dyn PredictorSource>>,
    /// Opinions older than this are stale — one evaluation cycle.
    max_signal_age: Duration,
}

impl SignalCollector {
    pub fn new(max_signal_age_secs: u64) -> Self {
        Self {
            sources: Vec::new(),
            max_signal_age: Duration::seconds(max_signal_age_secs as i64),
        }
    }

    /// Register an external predictor.  Registration order is preserved and
    /// determines iteration order during collection.
    pub fn register(&mut self, source: Arc<dyn PredictorSource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Pull the latest opinion from every registered source for the given
    /// instrument/horizon, validating each at the boundary.
    ///
    /// A source may contribute at most one signal per pair per cycle; if the
    /// same source id shows up twice, the newer `observed_at` wins.
    pub fn collect(
        &self,
        instrument_id: &str,
        horizon: Horizon,
        now: DateTime<Utc>,
    ) -> CollectOutcome {
        let mut signals: Vec<Signal> = Vec::with_capacity(self.sources.len());
        let mut dropped = Vec::new();

        for source in &self.sources {
            let source_id = source.source_id().to_string();

            let opinion = match source.opinion(instrument_id, horizon) {
                Some(op) => op,
                None => {
                    debug!(
                        source = %source_id,
                        instrument = instrument_id,
                        horizon = %horizon,
                        "source unavailable, omitted"
                    );
                    dropped.push(DataQualityEvent {
                        source_id,
                        instrument_id: instrument_id.to_string(),
                        horizon,
                        reason: DataQualityReason::Unavailable,
                        observed_at: None,
                        at: now,
                    });
                    continue;
                }
            };

            if !opinion.confidence.is_finite()
                || !(0.0..=1.0).contains(&opinion.confidence)
            {
                warn!(
                    source = %source_id,
                    instrument = instrument_id,
                    horizon = %horizon,
                    confidence = opinion.confidence,
                    "confidence outside [0,1], signal dropped"
                );
                dropped.push(DataQualityEvent {
                    source_id,
                    instrument_id: instrument_id.to_string(),
                    horizon,
                    reason: DataQualityReason::ConfidenceOutOfRange,
                    observed_at: Some(opinion.observed_at),
                    at: now,
                });
                continue;
            }

            if now - opinion.observed_at > self.max_signal_age {
                warn!(
                    source = %source_id,
                    instrument = instrument_id,
                    horizon = %horizon,
                    observed_at = %opinion.observed_at,
                    "observation older than one cycle, signal dropped"
                );
                dropped.push(DataQualityEvent {
                    source_id,
                    instrument_id: instrument_id.to_string(),
                    horizon,
                    reason: DataQualityReason::StaleObservation,
                    observed_at: Some(opinion.observed_at),
                    at: now,
                });
                continue;
            }

            let signal = Signal {
                source_id,
                instrument_id: instrument_id.to_string(),
                direction: opinion.direction,
                confidence: opinion.confidence,
                horizon,
                observed_at: opinion.observed_at,
            };

            // Later overwrites earlier within the same cycle.
            match signals
                .iter_mut()
                .find(|s| s.source_id == signal.source_id)
            {
                Some(existing) if existing.observed_at <= signal.observed_at => {
                    *existing = signal;
                }
                Some(_) => {}
                None => signals.push(signal),
            }
        }

        CollectOutcome { signals, dropped }
    }
}

// =============================================================================
// Tests
// =============================================================================
