// =============================================================================
// Meridian Engine — Batch evaluation pipeline
// =============================================================================
//
// Ties the subsystems together.  For every (instrument, horizon) pair in a
// cycle:
//
//   1. Collector pulls and validates the latest predictor opinions.
//   2. Tracker supplies trust weights for the sources that answered.
//   3. Resolver combines the signals into one verdict.
//   4. Stability manager decides whether the verdict may replace the
//      previously published decision.
//   5. Store persists the result atomically.
//
// Pairs are evaluated on a bounded pool; within one pair the pipeline is
// strictly sequential and guarded by a per-key lock, so two overlapping
// cycles can never interleave their read-modify-write on the same slot.
// Failures are isolated per pair: a bad source or a failed write surfaces
// in the cycle report, never as a batch abort.  The engine performs no
// network I/O — predictor calls finished (or timed out) upstream.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::collector::{DataQualityEvent, SignalCollector};
use crate::config::EngineConfig;
use crate::explainer::{explain, HumanSummary};
use crate::resolver::{ConflictResolver, Resolution};
use crate::stability::{StabilityAction, StabilityManager};
use crate::store::DecisionStore;
use crate::tracker::PredictorTrustModel;
use crate::types::{DecisionKey, Horizon};

/// Maximum data-quality events retained in the audit ring.
const MAX_QUALITY_EVENTS: usize = 200;

// =============================================================================
// Cycle reporting
// =============================================================================

/// Per-key failure surfaced to the scheduler; the batch itself never aborts
/// on these.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationError {
    pub key: String,
    pub message: String,
}

/// Accounting for one `run_cycle` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Pairs that ran to completion (including ones that ended in a held
    /// verdict).
    pub evaluated: usize,
    pub adopted: usize,
    pub refreshed: usize,
    /// Contradictions noted but below the confirmation threshold.
    pub held: usize,
    pub overridden: usize,
    /// Pairs not started because an abort was requested.
    pub skipped: usize,
    pub errors: Vec<EvaluationError>,
    pub aborted: bool,
}

/// Aggregate view over the decision store, for the dashboard status panel.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub total_decisions: usize,
    pub locked: usize,
    pub re_evaluable: usize,
    /// Decisions with an active confirmation streak against them.
    pub pending_overrides: usize,
    pub contested: usize,
}

enum KeyOutcome {
    Done(StabilityAction),
    Failed(EvaluationError),
    Skipped,
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    config: EngineConfig,
    collector: SignalCollector,
    trust: Arc<dyn PredictorTrustModel>,
    resolver: ConflictResolver,
    stability: StabilityManager,
    store: Arc<dyn DecisionStore>,

    /// Set to stop the current batch between evaluations.
    abort_requested: AtomicBool,
    cycle_counter: AtomicU64,

    /// Bounded ring of recent collector drops, for the dashboard.
    quality_events: RwLock<Vec<DataQualityEvent>>,

    /// One lock per decision slot, created lazily.
    key_locks: Mutex<HashMap<DecisionKey, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        collector: SignalCollector,
        trust: Arc<dyn PredictorTrustModel>,
        store: Arc<dyn DecisionStore>,
    ) -> Self {
        let resolver = ConflictResolver::new(config.resolver.clone());
        let stability = StabilityManager::new(config.stability.clone());

        info!(
            horizons = ?config.horizons,
            sources = collector.source_count(),
            max_parallel = config.max_parallel_evaluations,
            "engine initialised"
        );

        Self {
            config,
            collector,
            trust,
            resolver,
            stability,
            store,
            abort_requested: AtomicBool::new(false),
            cycle_counter: AtomicU64::new(0),
            quality_events: RwLock::new(Vec::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Scheduler entry point ───────────────────────────────────────────

    /// Evaluate every configured horizon for every given instrument.
    ///
    /// Called by the external scheduler; the engine never schedules itself.
    pub async fn run_cycle(&self, instrument_ids: &[String]) -> CycleReport {
        let cycle = self.cycle_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();

        let keys: Vec<DecisionKey> = instrument_ids
            .iter()
            .flat_map(|instrument| {
                self.config
                    .horizons
                    .iter()
                    .map(move |&h| DecisionKey::new(instrument.clone(), h))
            })
            .collect();

        info!(cycle, pairs = keys.len(), "evaluation cycle started");

        let outcomes: Vec<KeyOutcome> = stream::iter(keys)
            .map(|key| async move {
                // Abort lands between evaluations: pairs already in flight
                // finish and publish; the rest never start.
                if self.abort_requested.load(Ordering::SeqCst) {
                    return KeyOutcome::Skipped;
                }
                match self.evaluate_key(&key) {
                    Ok(action) => KeyOutcome::Done(action),
                    Err(e) => {
                        warn!(key = %key, error = %e, "pair evaluation failed");
                        KeyOutcome::Failed(EvaluationError {
                            key: key.to_string(),
                            message: format!("{e:#}"),
                        })
                    }
                }
            })
            .buffer_unordered(self.config.max_parallel_evaluations.max(1))
            .collect()
            .await;

        let mut report = CycleReport {
            cycle,
            started_at,
            completed_at: Utc::now(),
            evaluated: 0,
            adopted: 0,
            refreshed: 0,
            held: 0,
            overridden: 0,
            skipped: 0,
            errors: Vec::new(),
            aborted: self.abort_requested.load(Ordering::SeqCst),
        };

        for outcome in outcomes {
            match outcome {
                KeyOutcome::Done(action) => {
                    report.evaluated += 1;
                    match action {
                        StabilityAction::Adopted => report.adopted += 1,
                        StabilityAction::Refreshed => report.refreshed += 1,
                        StabilityAction::PendingChange => report.held += 1,
                        StabilityAction::Overridden => report.overridden += 1,
                    }
                }
                KeyOutcome::Failed(err) => report.errors.push(err),
                KeyOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            cycle,
            evaluated = report.evaluated,
            adopted = report.adopted,
            refreshed = report.refreshed,
            held = report.held,
            overridden = report.overridden,
            errors = report.errors.len(),
            skipped = report.skipped,
            "evaluation cycle finished"
        );

        report
    }

    /// Evaluate one (instrument, horizon) pair end to end.
    fn evaluate_key(&self, key: &DecisionKey) -> Result<StabilityAction> {
        let guard = self.key_guard(key);
        let _held = guard.lock();

        let now = Utc::now();

        // ── 1. Collect + validate ───────────────────────────────────────
        let collected = self.collector.collect(&key.instrument_id, key.horizon, now);
        self.push_quality_events(collected.dropped);

        // ── 2-3. Weigh + resolve ────────────────────────────────────────
        let resolution = if collected.signals.is_empty() {
            Resolution::no_data()
        } else {
            let sources: Vec<String> = collected
                .signals
                .iter()
                .map(|s| s.source_id.clone())
                .collect();
            let weights =
                self.trust
                    .weights_for_sources(&key.instrument_id, key.horizon, &sources);
            self.resolver.resolve(&collected.signals, &weights)
        };

        // ── 4. Stability gate ───────────────────────────────────────────
        let prior = self
            .store
            .get(key)
            .with_context(|| format!("failed to read prior decision for {key}"))?;
        let (decision, action) = self.stability.apply(prior, key, &resolution, now);

        // ── 5. Persist, retrying once ───────────────────────────────────
        if let Err(first) = self.store.put(decision.clone()) {
            warn!(key = %key, error = %first, "decision write failed, retrying once");
            self.store
                .put(decision)
                .with_context(|| format!("decision write failed after retry for {key}"))?;
        }

        Ok(action)
    }

    fn key_guard(&self, key: &DecisionKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock();
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Outcome feedback ────────────────────────────────────────────────

    /// Feed one resolved outcome from the external evaluator into the
    /// trust model.  Append-style; never blocks an evaluation batch.
    pub fn record_outcome(
        &self,
        source_id: &str,
        instrument_id: &str,
        horizon: Horizon,
        was_correct: bool,
    ) {
        self.trust
            .record_outcome(source_id, instrument_id, horizon, was_correct);
    }

    // ── Abort control ───────────────────────────────────────────────────

    /// Stop the in-flight batch between evaluations.  No partial decision
    /// ever becomes visible: pairs either run the full pipeline or are
    /// skipped.
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        info!("batch abort requested");
    }

    /// Re-arm the engine for the next scheduled cycle.
    pub fn clear_abort(&self) {
        self.abort_requested.store(false, Ordering::SeqCst);
    }

    // ── Read side ───────────────────────────────────────────────────────

    /// Current decision for a pair, if one has been published.
    pub fn decision(&self, key: &DecisionKey) -> Result<Option<crate::decision::Decision>> {
        self.store.get(key)
    }

    /// Human summaries of every active decision, for the presentation
    /// layer.
    pub fn summaries(&self) -> Result<Vec<HumanSummary>> {
        Ok(self.store.all_active()?.iter().map(explain).collect())
    }

    /// Aggregate lock/override counts across the store.
    pub fn status(&self) -> Result<EngineStatus> {
        let now = Utc::now();
        let active = self.store.all_active()?;

        let locked = active.iter().filter(|d| d.is_locked(now)).count();
        let pending_overrides = active.iter().filter(|d| d.pending_count > 0).count();
        let contested = active.iter().filter(|d| d.contested).count();

        Ok(EngineStatus {
            total_decisions: active.len(),
            locked,
            re_evaluable: active.len() - locked,
            pending_overrides,
            contested,
        })
    }

    /// Recent collector drops, newest last.
    pub fn recent_quality_events(&self) -> Vec<DataQualityEvent> {
        self.quality_events.read().clone()
    }

    fn push_quality_events(&self, events: Vec<DataQualityEvent>) {
        if events.is_empty() {
            return;
        }
        let mut ring = self.quality_events.write();
        ring.extend(events);
        while ring.len() > MAX_QUALITY_EVENTS {
            ring.remove(0);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
