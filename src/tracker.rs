// =============================================================================
// Performance Tracker — Rolling source reliability and trust weights
// =============================================================================
//
// Every predictor source accumulates win/loss outcomes as ground truth
// arrives from the external outcome evaluator.  Trust weights are derived
// from an exponentially-weighted accuracy over a bounded window of recent
// outcomes, normalized so the active sources sum to 1.
//
// Sources below the minimum outcome count receive a fixed bootstrap weight
// instead of their (noisy) measured accuracy, so a newly added predictor is
// never permanently starved of influence.
//
// Records are keyed by (source, horizon): a model that is sharp at 1 hour
// may be noise at 30 days.  Stats pool across instruments; the instrument id
// stays in the call signatures for logging and future segmentation.
//
// The tracker never fetches prices itself — outcome resolution is an
// external collaborator feeding `record_outcome`.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TrustParams;
use crate::types::Horizon;

// =============================================================================
// Trust model seam
// =============================================================================

/// Per-source trust weighting.  The engine only sees this interface, so the
/// EMA model below can be swapped for a Bayesian or decay-by-age model
/// without touching the resolver.
pub trait PredictorTrustModel: Send + Sync {
    /// Feed one resolved outcome for a source's past prediction.
    fn record_outcome(
        &self,
        source_id: &str,
        instrument_id: &str,
        horizon: Horizon,
        was_correct: bool,
    );

    /// Normalized weights over every source tracked at this horizon.
    /// Empty map when nothing has been recorded yet.
    fn weights_for(&self, instrument_id: &str, horizon: Horizon) -> HashMap<String, f64>;

    /// Normalized weights over exactly the given sources — the set that
    /// produced signals this cycle.  Sources without enough history get the
    /// bootstrap weight before normalization.
    fn weights_for_sources(
        &self,
        instrument_id: &str,
        horizon: Horizon,
        sources: &[String],
    ) -> HashMap<String, f64>;
}

// =============================================================================
// SourcePerformance
// =============================================================================

/// Rolling reliability record for one (source, horizon).
///
/// Created lazily on the first outcome, never deleted — a silent source
/// simply stops accumulating and its bounded window keeps its last state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePerformance {
    pub source_id: String,
    pub horizon: Horizon,
    pub wins: u64,
    pub losses: u64,
    pub total: u64,
    /// EMA of the recent outcome window, in [0, 1].
    pub recent_accuracy: f64,
    /// Most recent outcomes, oldest first, bounded by the accuracy window.
    recent: VecDeque<bool>,
}

impl SourcePerformance {
    fn new(source_id: &str, horizon: Horizon) -> Self {
        Self {
            source_id: source_id.to_string(),
            horizon,
            wins: 0,
            losses: 0,
            total: 0,
            recent_accuracy: 0.5,
            recent: VecDeque::new(),
        }
    }

    fn record(&mut self, was_correct: bool, window: usize, alpha: f64) {
        if was_correct {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total += 1;

        self.recent.push_back(was_correct);
        while self.recent.len() > window {
            self.recent.pop_front();
        }

        // EMA folded over the window from a neutral 0.5 prior, so the value
        // is reproducible from the stored deque alone.
        let mut acc = 0.5;
        for &hit in &self.recent {
            let value = if hit { 1.0 } else { 0.0 };
            acc += alpha * (value - acc);
        }
        self.recent_accuracy = acc;
    }

    /// Raw (un-normalized) weight under the given trust parameters.
    fn raw_weight(&self, params: &TrustParams) -> f64 {
        if self.total < params.min_outcomes {
            params.bootstrap_weight
        } else {
            self.recent_accuracy
        }
    }
}

// =============================================================================
// PerformanceTracker — the EMA-based trust model
// =============================================================================

pub struct PerformanceTracker {
    params: TrustParams,
    records: RwLock<HashMap<(String, Horizon), SourcePerformance>>,
}

impl PerformanceTracker {
    pub fn new(params: TrustParams) -> Self {
        Self {
            params,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of one source's record, for dashboards and tests.
    pub fn performance(&self, source_id: &str, horizon: Horizon) -> Option<SourcePerformance> {
        self.records
            .read()
            .get(&(source_id.to_string(), horizon))
            .cloned()
    }

    pub fn tracked_sources(&self, horizon: Horizon) -> usize {
        self.records
            .read()
            .keys()
            .filter(|(_, h)| *h == horizon)
            .count()
    }

    /// Normalize a set of raw weights so they sum to 1.  A degenerate
    /// all-zero set falls back to uniform weights to keep the vote defined.
    fn normalize(raw: Vec<(String, f64)>) -> HashMap<String, f64> {
        let sum: f64 = raw.iter().map(|(_, w)| w).sum();
        if raw.is_empty() {
            return HashMap::new();
        }
        if sum <= f64::EPSILON {
            let uniform = 1.0 / raw.len() as f64;
            return raw.into_iter().map(|(id, _)| (id, uniform)).collect();
        }
        raw.into_iter().map(|(id, w)| (id, w / sum)).collect()
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Persist all records to `path` using an atomic write (write to
    /// `.tmp`, then rename), so a crash mid-write never corrupts the
    /// previously committed snapshot.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let snapshot = TrackerSnapshot {
            saved_at: Utc::now(),
            records: self.records.read().values().cloned().collect(),
        };

        let content = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialise tracker snapshot to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp snapshot to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp snapshot to {}", path.display()))?;

        info!(path = %path.display(), records = snapshot.records.len(), "tracker snapshot saved (atomic)");
        Ok(())
    }

    /// Load records from a snapshot previously written by [`save`].
    pub fn load(path: impl AsRef<Path>, params: TrustParams) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tracker snapshot from {}", path.display()))?;

        let snapshot: TrackerSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tracker snapshot from {}", path.display()))?;

        let mut records = HashMap::new();
        for record in snapshot.records {
            records.insert((record.source_id.clone(), record.horizon), record);
        }

        info!(path = %path.display(), records = records.len(), "tracker snapshot loaded");

        Ok(Self {
            params,
            records: RwLock::new(records),
        })
    }
}

/// On-disk form of the tracker state.
#[derive(Debug, Serialize, Deserialize)]
struct TrackerSnapshot {
    saved_at: DateTime<Utc>,
    records: Vec<SourcePerformance>,
}

impl PredictorTrustModel for PerformanceTracker {
    fn record_outcome(
        &self,
        source_id: &str,
        instrument_id: &str,
        horizon: Horizon,
        was_correct: bool,
    ) {
        let mut records = self.records.write();
        let record = records
            .entry((source_id.to_string(), horizon))
            .or_insert_with(|| SourcePerformance::new(source_id, horizon));

        record.record(
            was_correct,
            self.params.accuracy_window,
            self.params.ema_alpha,
        );

        debug!(
            source = source_id,
            instrument = instrument_id,
            horizon = %horizon,
            was_correct,
            total = record.total,
            recent_accuracy = format!("{:.3}", record.recent_accuracy),
            "outcome recorded"
        );
    }

    fn weights_for(&self, _instrument_id: &str, horizon: Horizon) -> HashMap<String, f64> {
        let records = self.records.read();
        let raw: Vec<(String, f64)> = records
            .values()
            .filter(|r| r.horizon == horizon)
            .map(|r| (r.source_id.clone(), r.raw_weight(&self.params)))
            .collect();
        Self::normalize(raw)
    }

    fn weights_for_sources(
        &self,
        _instrument_id: &str,
        horizon: Horizon,
        sources: &[String],
    ) -> HashMap<String, f64> {
        let records = self.records.read();
        let raw: Vec<(String, f64)> = sources
            .iter()
            .map(|id| {
                let weight = records
                    .get(&(id.clone(), horizon))
                    .map(|r| r.raw_weight(&self.params))
                    .unwrap_or(self.params.bootstrap_weight);
                (id.clone(), weight)
            })
            .collect();
        Self::normalize(raw)
    }
}

// =============================================================================
// Tests
// =============================================================================
