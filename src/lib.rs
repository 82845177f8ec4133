// =============================================================================
// Meridian Signal Engine
// =============================================================================
//
// Consolidates independently-computed predictor opinions (technical, ML,
// fundamental, sentiment) into one stable, explainable recommendation per
// instrument and horizon.
//
// Pipeline per (instrument, horizon) pair:
//
//   SignalCollector  — normalize + validate predictor opinions
//   PerformanceTracker — trust weights from historical accuracy
//   ConflictResolver — weighted vote, contested detection, verdict tiers
//   StabilityManager — hold periods + consecutive-confirmation override
//   DecisionStore    — atomic keyed persistence of the active decision
//   Explainer        — human-readable summary of the result
//
// The engine is driven entirely from outside: a scheduler calls
// `Engine::run_cycle`, an outcome evaluator feeds `record_outcome`, and the
// presentation layer reads decisions and summaries.  It never schedules
// itself and performs no network I/O.
// =============================================================================

pub mod collector;
pub mod config;
pub mod decision;
pub mod engine;
pub mod explainer;
pub mod resolver;
pub mod stability;
pub mod store;
pub mod tracker;
pub mod types;

pub use collector::{DataQualityEvent, DataQualityReason, Opinion, PredictorSource, SignalCollector};
pub use config::EngineConfig;
pub use decision::{Decision, DecisionSnapshot, SignalSummary};
pub use engine::{CycleReport, Engine, EngineStatus, EvaluationError};
pub use explainer::{explain, HumanSummary};
pub use resolver::{ConflictResolver, Resolution};
pub use stability::{StabilityAction, StabilityManager};
pub use store::{DecisionStore, FileDecisionStore, MemoryDecisionStore};
pub use tracker::{PerformanceTracker, PredictorTrustModel, SourcePerformance};
pub use types::{DecisionKey, Direction, Horizon, Signal, Verdict};
