// =============================================================================
// Engine Configuration — Tunable consolidation settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian engine.  The confirmation
// threshold, hold-period tiers, contested margin and bootstrap weight all
// changed across versions of the product, so every one of them lives here
// instead of in code.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Horizon;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_horizons() -> Vec<Horizon> {
    Horizon::all().to_vec()
}

fn default_max_signal_age_secs() -> u64 {
    3600
}

fn default_max_parallel_evaluations() -> usize {
    8
}

fn default_history_cap() -> usize {
    200
}

fn default_ema_alpha() -> f64 {
    0.1
}

fn default_accuracy_window() -> usize {
    50
}

fn default_min_outcomes() -> u64 {
    5
}

fn default_bootstrap_weight() -> f64 {
    0.5
}

fn default_contested_margin() -> f64 {
    0.20
}

fn default_strong_confidence() -> f64 {
    0.85
}

fn default_moderate_confidence() -> f64 {
    0.65
}

fn default_confirmation_threshold() -> u32 {
    3
}

fn default_strong_hold_days() -> u32 {
    30
}

fn default_moderate_hold_days() -> u32 {
    5
}

fn default_weak_hold_days() -> u32 {
    1
}

fn default_strong_hold_confidence() -> f64 {
    0.85
}

fn default_moderate_hold_confidence() -> f64 {
    0.70
}

// =============================================================================
// TrustParams
// =============================================================================

/// Tunable parameters for source reliability tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustParams {
    /// Smoothing factor of the accuracy EMA.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,

    /// Number of most recent outcomes the EMA is computed over.
    #[serde(default = "default_accuracy_window")]
    pub accuracy_window: usize,

    /// Minimum resolved outcomes before a source earns its own weight.
    #[serde(default = "default_min_outcomes")]
    pub min_outcomes: u64,

    /// Raw weight assigned to sources below `min_outcomes`, so new
    /// predictors are never starved to zero influence.
    #[serde(default = "default_bootstrap_weight")]
    pub bootstrap_weight: f64,
}

impl Default for TrustParams {
    fn default() -> Self {
        Self {
            ema_alpha: default_ema_alpha(),
            accuracy_window: default_accuracy_window(),
            min_outcomes: default_min_outcomes(),
            bootstrap_weight: default_bootstrap_weight(),
        }
    }
}

// =============================================================================
// ResolverParams
// =============================================================================

/// Tunable parameters for the weighted vote and verdict mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverParams {
    /// Relative score gap below which the runner-up direction marks the
    /// outcome as contested (0.20 means "within 20% of the winner").
    #[serde(default = "default_contested_margin")]
    pub contested_margin: f64,

    /// Normalized confidence at or above which an uncontested UP maps to
    /// STRONG_BUY (DOWN maps to AVOID).
    #[serde(default = "default_strong_confidence")]
    pub strong_confidence: f64,

    /// Normalized confidence at or above which an uncontested UP maps to
    /// BUY (DOWN maps to CAUTIOUS).
    #[serde(default = "default_moderate_confidence")]
    pub moderate_confidence: f64,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            contested_margin: default_contested_margin(),
            strong_confidence: default_strong_confidence(),
            moderate_confidence: default_moderate_confidence(),
        }
    }
}

// =============================================================================
// StabilityParams
// =============================================================================

/// Tunable parameters for decision locking and override confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityParams {
    /// Consecutive contradicting cycles required to override a locked
    /// decision.
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u32,

    /// Hold period in trading days for high-confidence decisions.
    #[serde(default = "default_strong_hold_days")]
    pub strong_hold_days: u32,

    /// Hold period in trading days for moderate-confidence decisions.
    #[serde(default = "default_moderate_hold_days")]
    pub moderate_hold_days: u32,

    /// Hold period in trading days for everything else.
    #[serde(default = "default_weak_hold_days")]
    pub weak_hold_days: u32,

    /// Confidence at or above which the strong hold tier applies.
    #[serde(default = "default_strong_hold_confidence")]
    pub strong_hold_confidence: f64,

    /// Confidence at or above which the moderate hold tier applies.
    #[serde(default = "default_moderate_hold_confidence")]
    pub moderate_hold_confidence: f64,
}

impl Default for StabilityParams {
    fn default() -> Self {
        Self {
            confirmation_threshold: default_confirmation_threshold(),
            strong_hold_days: default_strong_hold_days(),
            moderate_hold_days: default_moderate_hold_days(),
            weak_hold_days: default_weak_hold_days(),
            strong_hold_confidence: default_strong_hold_confidence(),
            moderate_hold_confidence: default_moderate_hold_confidence(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Horizons evaluated for every instrument in a cycle.
    #[serde(default = "default_horizons")]
    pub horizons: Vec<Horizon>,

    /// Signals whose `observed_at` is older than this are treated as stale
    /// and dropped at the collector boundary.  One evaluation cycle.
    #[serde(default = "default_max_signal_age_secs")]
    pub max_signal_age_secs: u64,

    /// Maximum instrument/horizon evaluations in flight at once.
    #[serde(default = "default_max_parallel_evaluations")]
    pub max_parallel_evaluations: usize,

    /// Maximum archived snapshots kept per decision.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Source reliability tracking parameters.
    #[serde(default)]
    pub trust: TrustParams,

    /// Weighted vote parameters.
    #[serde(default)]
    pub resolver: ResolverParams,

    /// Lock and override parameters.
    #[serde(default)]
    pub stability: StabilityParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizons: default_horizons(),
            max_signal_age_secs: default_max_signal_age_secs(),
            max_parallel_evaluations: default_max_parallel_evaluations(),
            history_cap: default_history_cap(),
            trust: TrustParams::default(),
            resolver: ResolverParams::default(),
            stability: StabilityParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            horizons = ?config.horizons,
            confirmation_threshold = config.stability.confirmation_threshold,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
