// =============================================================================
// Conflict Resolver — Weighted vote across heterogeneous predictor signals
// =============================================================================
//
// Combines the cycle's signals into a single verdict:
//
//   1. Weighted vote per direction: score[dir] = Σ confidence·weight.
//   2. Winner is the highest score; its confidence is the normalized share
//      of total conviction (score[winner] / Σ scores).
//   3. A runner-up within the contested margin of the winner flags the
//      outcome as contested, which caps the verdict below STRONG_BUY/AVOID.
//   4. Fixed thresholds map (direction, confidence) to a verdict tier.
//
// The whole pass is a deterministic scoring function: no randomness, no
// clock reads, fixed tie-breaking — identical inputs yield bit-identical
// output.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResolverParams;
use crate::decision::SignalSummary;
use crate::types::{Direction, Signal, Verdict};

/// Reason string attached when a cycle produced no usable signals.
pub const NO_DATA_REASON: &str = "no data available";

/// Directions in fixed vote order; ties resolve to the earlier entry.
const VOTE_ORDER: [Direction; 3] = [Direction::Up, Direction::Down, Direction::Flat];

/// Outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub direction: Direction,
    pub verdict: Verdict,
    /// Normalized share of total conviction behind the winner, in [0, 1].
    pub confidence: f64,
    pub contested: bool,
    /// Top supporting signals, strongest contribution first (max 3).
    pub reasons: Vec<String>,
    /// All signals that opposed the winning direction.
    pub conflicts: Vec<SignalSummary>,
}

impl Resolution {
    /// Resolution for a cycle with zero usable signals.
    pub fn no_data() -> Self {
        Self {
            direction: Direction::Flat,
            verdict: Verdict::Hold,
            confidence: 0.0,
            contested: false,
            reasons: vec![NO_DATA_REASON.to_string()],
            conflicts: Vec::new(),
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.reasons.iter().any(|r| r == NO_DATA_REASON)
    }
}

pub struct ConflictResolver {
    params: ResolverParams,
}

impl ConflictResolver {
    pub fn new(params: ResolverParams) -> Self {
        Self { params }
    }

    /// Resolve the cycle's signals into a single verdict.
    ///
    /// `weights` is the trust map for exactly the sources present in
    /// `signals`; an empty map falls back to uniform weights so the vote
    /// stays defined.
    pub fn resolve(&self, signals: &[Signal], weights: &HashMap<String, f64>) -> Resolution {
        if signals.is_empty() {
            return Resolution::no_data();
        }

        let uniform = 1.0 / signals.len() as f64;
        let weight_of = |source_id: &str| -> f64 {
            if weights.is_empty() {
                uniform
            } else {
                weights.get(source_id).copied().unwrap_or(0.0)
            }
        };

        // ── 1. Weighted vote per direction ──────────────────────────────
        let mut summaries: Vec<SignalSummary> = signals
            .iter()
            .map(|s| SignalSummary {
                source_id: s.source_id.clone(),
                direction: s.direction,
                confidence: s.confidence,
                weight: weight_of(&s.source_id),
            })
            .collect();

        // Deterministic ordering: contribution desc, then source id.
        summaries.sort_by(|a, b| {
            b.contribution()
                .partial_cmp(&a.contribution())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        let score_for = |dir: Direction| -> f64 {
            summaries
                .iter()
                .filter(|s| s.direction == dir)
                .map(|s| s.contribution())
                .sum()
        };

        let scores: Vec<(Direction, f64)> =
            VOTE_ORDER.iter().map(|&d| (d, score_for(d))).collect();

        // ── 2. Winner and normalized confidence ─────────────────────────
        let (winner, winner_score) = scores
            .iter()
            .copied()
            .reduce(|best, cand| if cand.1 > best.1 { cand } else { best })
            .unwrap_or((Direction::Flat, 0.0));

        let total: f64 = scores.iter().map(|(_, s)| s).sum();
        let confidence = if total > f64::EPSILON {
            winner_score / total
        } else {
            0.0
        };

        // ── 3. Contested flag ───────────────────────────────────────────
        let runner_up = scores
            .iter()
            .filter(|(d, _)| *d != winner)
            .map(|(_, s)| *s)
            .fold(0.0_f64, f64::max);

        let contested = winner_score > f64::EPSILON
            && runner_up >= (1.0 - self.params.contested_margin) * winner_score;

        // ── 4. Verdict mapping ──────────────────────────────────────────
        let verdict = self.map_verdict(winner, confidence, contested);

        // ── 5. Reasons and conflicts ────────────────────────────────────
        let reasons: Vec<String> = summaries
            .iter()
            .filter(|s| s.direction == winner)
            .take(3)
            .map(|s| {
                format!(
                    "{}: {} @ {:.2} (weight {:.2})",
                    s.source_id, s.direction, s.confidence, s.weight
                )
            })
            .collect();

        let conflicts: Vec<SignalSummary> = summaries
            .iter()
            .filter(|s| s.direction != winner)
            .cloned()
            .collect();

        debug!(
            winner = %winner,
            verdict = %verdict,
            confidence = format!("{:.3}", confidence),
            contested,
            signals = signals.len(),
            conflicts = conflicts.len(),
            "signals resolved"
        );

        Resolution {
            direction: winner,
            verdict,
            confidence,
            contested,
            reasons,
            conflicts,
        }
    }

    /// Map (direction, confidence) to a verdict tier.  Contested outcomes
    /// are capped: never STRONG_BUY/AVOID, at most HOLD on the buy side and
    /// CAUTIOUS on the sell side.
    fn map_verdict(&self, direction: Direction, confidence: f64, contested: bool) -> Verdict {
        let mapped = match direction {
            Direction::Up => {
                if confidence >= self.params.strong_confidence {
                    Verdict::StrongBuy
                } else if confidence >= self.params.moderate_confidence {
                    Verdict::Buy
                } else {
                    Verdict::Hold
                }
            }
            Direction::Down => {
                if confidence >= self.params.strong_confidence {
                    Verdict::Avoid
                } else if confidence >= self.params.moderate_confidence {
                    Verdict::Cautious
                } else {
                    Verdict::Hold
                }
            }
            Direction::Flat => Verdict::Hold,
        };

        if contested {
            match mapped {
                Verdict::StrongBuy | Verdict::Buy => Verdict::Hold,
                Verdict::Avoid => Verdict::Cautious,
                other => other,
            }
        } else {
            mapped
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Horizon;
    use chrono::{TimeZone, Utc};

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(ResolverParams::default())
    }

    fn signal(source: &str, direction: Direction, confidence: f64) -> Signal {
        Signal {
            source_id: source.to_string(),
            instrument_id: "TCS".to_string(),
            direction,
            confidence,
            horizon: Horizon::D1,
            // Fixed timestamp keeps resolve() reproducible across calls.
            observed_at: Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap(),
        }
    }

    fn equal_weights(sources: &[&str]) -> HashMap<String, f64> {
        let w = 1.0 / sources.len() as f64;
        sources.iter().map(|s| (s.to_string(), w)).collect()
    }

    #[test]
    fn single_strong_source_yields_strong_buy() {
        let signals = vec![signal("technical", Direction::Up, 0.9)];
        let weights = equal_weights(&["technical"]);

        let res = resolver().resolve(&signals, &weights);
        // Sole source owns the entire conviction share.
        assert!((res.confidence - 1.0).abs() < 1e-12);
        assert_eq!(res.verdict, Verdict::StrongBuy);
        assert!(!res.contested);
        assert!(res.conflicts.is_empty());
    }

    #[test]
    fn clear_majority_maps_to_documented_tiers() {
        // Two of three agree UP with high confidence; weights sum to 1.
        let signals = vec![
            signal("technical", Direction::Up, 0.9),
            signal("lstm", Direction::Up, 0.8),
            signal("sentiment", Direction::Down, 0.2),
        ];
        let weights = equal_weights(&["technical", "lstm", "sentiment"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Up);
        // up 0.5667 / total 0.6333 => ~0.8947 >= 0.85 => STRONG_BUY.
        assert!(res.confidence >= 0.85);
        assert_eq!(res.verdict, Verdict::StrongBuy);
        assert!(!res.contested);
        assert_eq!(res.conflicts.len(), 1);
        assert_eq!(res.conflicts[0].source_id, "sentiment");
    }

    #[test]
    fn down_majority_mirrors_to_avoid() {
        let signals = vec![
            signal("lstm", Direction::Down, 0.9),
            signal("rf", Direction::Down, 0.85),
            signal("sentiment", Direction::Up, 0.1),
        ];
        let weights = equal_weights(&["lstm", "rf", "sentiment"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Down);
        assert_eq!(res.verdict, Verdict::Avoid);
    }

    #[test]
    fn moderate_confidence_maps_to_buy() {
        let signals = vec![
            signal("technical", Direction::Up, 0.8),
            signal("lstm", Direction::Down, 0.3),
        ];
        let weights = equal_weights(&["technical", "lstm"]);

        let res = resolver().resolve(&signals, &weights);
        // up 0.4 / total 0.55 => ~0.727: BUY tier, and runner-up is far off.
        assert_eq!(res.verdict, Verdict::Buy);
        assert!(!res.contested);
    }

    #[test]
    fn mixed_equal_weight_fixture_is_not_contested() {
        // UP wins 0.50 vs 0.2833 — the gap is outside the 20% contested
        // margin, so this mixed set still resolves cleanly.
        let signals = vec![
            signal("technical", Direction::Up, 0.9),
            signal("lstm", Direction::Down, 0.85),
            signal("sentiment", Direction::Up, 0.6),
        ];
        let weights = equal_weights(&["technical", "lstm", "sentiment"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Up);
        assert!(!res.contested);
        // 0.5 / 0.7833 => ~0.638: below the BUY tier.
        assert_eq!(res.verdict, Verdict::Hold);
        assert_eq!(res.conflicts.len(), 1);
    }

    #[test]
    fn contested_up_is_capped_at_hold() {
        // Runner-up within 20% of the winner: 0.3825 >= 0.8 * 0.45.
        let signals = vec![
            signal("technical", Direction::Up, 0.9),
            signal("lstm", Direction::Down, 0.85),
            signal("sentiment", Direction::Up, 0.6),
        ];
        let mut weights = HashMap::new();
        weights.insert("technical".to_string(), 0.40);
        weights.insert("lstm".to_string(), 0.45);
        weights.insert("sentiment".to_string(), 0.15);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Up);
        assert!(res.contested);
        assert_eq!(res.verdict, Verdict::Hold);
        assert_ne!(res.verdict, Verdict::StrongBuy);
    }

    #[test]
    fn contested_down_is_capped_at_cautious() {
        let signals = vec![
            signal("lstm", Direction::Down, 0.9),
            signal("technical", Direction::Up, 0.85),
        ];
        let mut weights = HashMap::new();
        weights.insert("lstm".to_string(), 0.50);
        weights.insert("technical".to_string(), 0.50);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Down);
        assert!(res.contested);
        assert!(
            res.verdict == Verdict::Cautious || res.verdict == Verdict::Hold,
            "contested must never reach AVOID, got {}",
            res.verdict
        );
        assert_ne!(res.verdict, Verdict::Avoid);
    }

    #[test]
    fn zero_signals_yields_no_data_hold() {
        let res = resolver().resolve(&[], &HashMap::new());
        assert_eq!(res.verdict, Verdict::Hold);
        assert!((res.confidence - 0.0).abs() < f64::EPSILON);
        assert!(res.reasons.iter().any(|r| r == NO_DATA_REASON));
        assert!(res.is_no_data());
    }

    #[test]
    fn zero_conviction_yields_hold_without_contest() {
        let signals = vec![
            signal("technical", Direction::Up, 0.0),
            signal("lstm", Direction::Down, 0.0),
        ];
        let weights = equal_weights(&["technical", "lstm"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.verdict, Verdict::Hold);
        assert!((res.confidence - 0.0).abs() < f64::EPSILON);
        assert!(!res.contested);
    }

    #[test]
    fn exact_tie_resolves_deterministically_to_up() {
        let signals = vec![
            signal("technical", Direction::Up, 0.6),
            signal("lstm", Direction::Down, 0.6),
        ];
        let weights = equal_weights(&["technical", "lstm"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Up);
        // Dead heat is maximally contested.
        assert!(res.contested);
    }

    #[test]
    fn flat_winner_holds() {
        let signals = vec![
            signal("technical", Direction::Flat, 0.9),
            signal("lstm", Direction::Up, 0.1),
        ];
        let weights = equal_weights(&["technical", "lstm"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.direction, Direction::Flat);
        assert_eq!(res.verdict, Verdict::Hold);
    }

    #[test]
    fn reasons_are_top_three_supporters_strongest_first() {
        let signals = vec![
            signal("a", Direction::Up, 0.5),
            signal("b", Direction::Up, 0.9),
            signal("c", Direction::Up, 0.7),
            signal("d", Direction::Up, 0.6),
        ];
        let weights = equal_weights(&["a", "b", "c", "d"]);

        let res = resolver().resolve(&signals, &weights);
        assert_eq!(res.reasons.len(), 3);
        assert!(res.reasons[0].starts_with("b:"));
        assert!(res.reasons[1].starts_with("c:"));
        assert!(res.reasons[2].starts_with("d:"));
    }

    #[test]
    fn missing_weight_map_falls_back_to_uniform() {
        let signals = vec![signal("technical", Direction::Up, 0.9)];
        let res = resolver().resolve(&signals, &HashMap::new());
        assert_eq!(res.verdict, Verdict::StrongBuy);
    }

    #[test]
    fn resolve_is_idempotent_bit_for_bit() {
        let signals = vec![
            signal("technical", Direction::Up, 0.9),
            signal("lstm", Direction::Down, 0.85),
            signal("sentiment", Direction::Up, 0.6),
        ];
        let weights = equal_weights(&["technical", "lstm", "sentiment"]);

        let r = resolver();
        let first = serde_json::to_string(&r.resolve(&signals, &weights)).unwrap();
        let second = serde_json::to_string(&r.resolve(&signals, &weights)).unwrap();
        assert_eq!(first, second);
    }
}
